//! code-sidebar CLI.
//!
//! `inspect` runs one startup pass against a saved DOM snapshot; `watch`
//! launches Chrome, follows a chat page, and prints the panel whenever it
//! changes. While watching, stdin accepts `toggle <id>`, `copy <id>`, `clear`,
//! `metrics` and `quit`.
//!
//! Usage examples:
//!   $ cargo run --bin code-sidebar -- inspect --snapshot page.json
//!   $ CODE_SIDEBAR_CHROME_BIN=/path/to/chrome \
//!       cargo run --bin code-sidebar -- watch --url https://aistudio.google.com/ --show-browser

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use code_sidebar_rs::adapter::chromiumoxide::{ChromiumoxideSource, LaunchOptions};
use code_sidebar_rs::clipboard::CommandClipboard;
use code_sidebar_rs::config::{SidebarConfig, SidebarConfigOverrides, Verbosity};
use code_sidebar_rs::logging::{SidebarLogger, log_facade_callback};
use code_sidebar_rs::render::{RenderSurface, TextSurface};
use code_sidebar_rs::tree::DomSnapshot;
use code_sidebar_rs::watcher::{SidebarWatcher, UserAction, inspect_once};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(
    name = "code-sidebar",
    author,
    version,
    about = "Collects code blocks from the latest finished chat turn"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one extraction pass against a saved DOM snapshot.
    Inspect(InspectArgs),
    /// Watch a live page and print the panel as it changes.
    Watch(WatchArgs),
}

#[derive(Args)]
struct InspectArgs {
    /// Path to a DOM snapshot JSON file.
    #[arg(long)]
    snapshot: PathBuf,

    /// Print the full report as JSON instead of the rendered panel.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Chat page to open.
    #[arg(long, default_value = "https://aistudio.google.com/")]
    url: String,

    /// Chrome/Chromium binary. Falls back to CODE_SIDEBAR_CHROME_BIN.
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Show the launched browser window.
    #[arg(long)]
    show_browser: bool,

    /// Clipboard command, e.g. "xclip -selection clipboard".
    #[arg(long)]
    clipboard: Option<String>,

    /// Override the startup grace period in milliseconds.
    #[arg(long)]
    startup_grace_ms: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum StdinCommand {
    Action(UserAction),
    Metrics,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let config = SidebarConfig::from_env().context("invalid CODE_SIDEBAR_* configuration")?;
    let config = match verbosity_from_count(cli.verbose) {
        Some(verbose) => config.with_overrides(SidebarConfigOverrides::default().verbose(verbose)),
        None => config,
    };

    match cli.command {
        Command::Inspect(args) => run_inspect(args, &config),
        Command::Watch(args) => run_watch(args, config).await,
    }
}

fn run_inspect(args: InspectArgs, config: &SidebarConfig) -> Result<()> {
    let snapshot = DomSnapshot::load(&args.snapshot)
        .with_context(|| format!("failed to load {}", args.snapshot.display()))?;
    let report = inspect_once(config, &snapshot).context("inspection failed")?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialise report")?;
        println!("{rendered}");
        return Ok(());
    }

    info!(
        "control {:?}, state {:?}, pass {}",
        report.control, report.state, report.outcome
    );
    let mut surface = TextSurface::new(io::stdout());
    surface
        .render(&report.render)
        .context("failed to print panel")?;
    Ok(())
}

async fn run_watch(args: WatchArgs, config: SidebarConfig) -> Result<()> {
    let mut overrides = SidebarConfigOverrides::default();
    if let Some(command) = args.clipboard.clone() {
        overrides = overrides.clipboard_command(command);
    }
    if let Some(grace) = args.startup_grace_ms {
        overrides = overrides.startup_grace_ms(grace);
    }
    let config = config.with_overrides(overrides);

    let chrome = match args.chrome.clone() {
        Some(path) => path,
        None => PathBuf::from(env_var("CODE_SIDEBAR_CHROME_BIN")?),
    };
    let mut launch = LaunchOptions::new(&args.url);
    launch.chrome_executable = Some(chrome);
    launch.headless = !args.show_browser;

    let source = Arc::new(
        ChromiumoxideSource::launch(launch, config.poll_interval())
            .await
            .with_context(|| format!("failed to open {}", args.url))?,
    );
    info!("Opened {}", args.url);

    let clipboard = match &config.clipboard_command {
        Some(command) => CommandClipboard::from_command_line(command)
            .context("invalid clipboard command")?,
        None => CommandClipboard::detect(),
    };
    info!("Copying through '{}'", clipboard.program());

    let mut logger = SidebarLogger::new(config.verbose);
    logger.set_external_logger(Some(log_facade_callback()));

    let watcher = SidebarWatcher::new(
        config,
        source.clone(),
        Box::new(TextSurface::new(io::stdout())),
        Arc::new(clipboard),
        Arc::new(logger),
    )
    .context("failed to construct watcher")?;
    let handle = watcher.spawn().await.context("failed to start watching")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_command(&line) {
            Ok(Some(StdinCommand::Action(action))) => {
                handle.send(action).await.context("watcher stopped")?;
            }
            Ok(Some(StdinCommand::Metrics)) => {
                let metrics = serde_json::to_string(&handle.metrics())
                    .context("failed to serialise metrics")?;
                println!("{metrics}");
            }
            Ok(Some(StdinCommand::Quit)) => break,
            Ok(None) => {}
            Err(err) => eprintln!("{err}"),
        }
    }

    let metrics = handle.shutdown().await.context("watcher did not stop cleanly")?;
    info!(
        "Stopped after {} extraction passes and {} renders",
        metrics.extraction_passes, metrics.renders
    );
    source
        .close()
        .await
        .context("failed to close the browser")?;
    Ok(())
}

fn parse_command(line: &str) -> Result<Option<StdinCommand>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let id = parts.next();

    let command = match (verb.to_ascii_lowercase().as_str(), id) {
        ("toggle", Some(id)) => StdinCommand::Action(UserAction::Toggle(id.to_string())),
        ("copy", Some(id)) => StdinCommand::Action(UserAction::Copy(id.to_string())),
        ("toggle" | "copy", None) => bail!("usage: {verb} <id>"),
        ("clear", _) => StdinCommand::Action(UserAction::Clear),
        ("metrics", _) => StdinCommand::Metrics,
        ("quit" | "exit", _) => StdinCommand::Quit,
        _ => bail!("unknown command '{verb}'; expected toggle, copy, clear, metrics or quit"),
    };
    Ok(Some(command))
}

fn env_var(name: &str) -> Result<String> {
    let value =
        env::var(name).with_context(|| format!("{name} must be set or --chrome passed"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("{name} environment variable cannot be empty"));
    }
    Ok(value)
}

fn verbosity_from_count(count: u8) -> Option<Verbosity> {
    match count {
        0 => None,
        1 => Some(Verbosity::Medium),
        _ => Some(Verbosity::Detailed),
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
