//! Clipboard collaborator.

use std::env;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard command is empty")]
    EmptyCommand,
    #[error("failed to run clipboard command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("clipboard command '{program}' exited with {status}")]
    Status { program: String, status: String },
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn copy(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Pipes text into an external program such as `wl-copy` or `pbcopy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line.
    pub fn from_command_line(command: &str) -> Result<Self, ClipboardError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ClipboardError::EmptyCommand)?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Pick the platform's usual clipboard tool.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("pbcopy", Vec::new())
        } else if env::var_os("WAYLAND_DISPLAY").is_some() {
            Self::new("wl-copy", Vec::new())
        } else {
            Self::new(
                "xclip",
                vec!["-selection".to_string(), "clipboard".to_string()],
            )
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let spawn_error = |source| ClipboardError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClipboardError::Unavailable("stdin was not captured".to_string()))?;
        stdin.write_all(text.as_bytes()).await.map_err(spawn_error)?;
        drop(stdin);

        let status = child.wait().await.map_err(spawn_error)?;
        if status.success() {
            Ok(())
        } else {
            Err(ClipboardError::Status {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}
