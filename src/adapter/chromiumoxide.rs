//! Chromiumoxide-backed [`PageSource`] implementation.
//!
//! The source injects the embedded page helpers, reads snapshots through
//! them, and polls their mutation counter to produce [`MutationNotice`]s.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::dom_scripts::{
    mutation_count_expression, observe_expression, sidebar_dom_script, snapshot_expression,
};
use crate::source::{MutationNotice, NOTICE_CHANNEL_CAPACITY, PageSource, SourceError};
use crate::tracker::WatchScope;
use crate::tree::DomSnapshot;

fn map_browser_error(err: impl std::fmt::Display) -> SourceError {
    SourceError::Browser(err.to_string())
}

fn map_script_error(err: impl std::fmt::Display) -> SourceError {
    SourceError::Script(err.to_string())
}

/// Options for [`ChromiumoxideSource::launch`].
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub url: String,
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chrome_executable: None,
            headless: true,
            args: Vec::new(),
        }
    }
}

struct BrowserState {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Page source reading a live Chrome tab.
pub struct ChromiumoxideSource {
    page: Page,
    poll_interval: Duration,
    browser: Mutex<Option<BrowserState>>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumoxideSource {
    /// Wrap an already open page. The caller keeps ownership of its browser.
    pub async fn attach(page: Page, poll_interval: Duration) -> Result<Self, SourceError> {
        inject(&page).await?;
        Ok(Self {
            page,
            poll_interval,
            browser: Mutex::new(None),
            pollers: Mutex::new(Vec::new()),
        })
    }

    /// Launch a local browser, open `options.url`, and attach to that page.
    pub async fn launch(options: LaunchOptions, poll_interval: Duration) -> Result<Self, SourceError> {
        let config = build_config(&options)?;
        let (browser, handler) = Browser::launch(config).await.map_err(map_browser_error)?;
        let handler = spawn_handler(handler);

        let page = match browser.new_page(options.url.as_str()).await {
            Ok(page) => page,
            Err(err) => {
                handler.abort();
                return Err(map_browser_error(err));
            }
        };

        let source = Self::attach(page, poll_interval).await?;
        *source.browser.lock().await = Some(BrowserState { browser, handler });
        Ok(source)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Stop pollers and close the browser if this source launched it.
    pub async fn close(&self) -> Result<(), SourceError> {
        for poller in self.pollers.lock().await.drain(..) {
            poller.abort();
        }
        let state = self.browser.lock().await.take();
        if let Some(mut state) = state {
            let result = state.browser.close().await.map_err(map_browser_error);
            state.handler.abort();
            result?;
        }
        Ok(())
    }
}

#[async_trait]
impl PageSource for ChromiumoxideSource {
    async fn snapshot(&self) -> Result<DomSnapshot, SourceError> {
        let json: String = evaluate(&self.page, &snapshot_expression()).await?;
        Ok(DomSnapshot::from_flat_json_str(&json)?)
    }

    async fn watch(&self, scope: WatchScope) -> Result<mpsc::Receiver<MutationNotice>, SourceError> {
        let node = match scope {
            WatchScope::Node(id) => Some(id.0),
            WatchScope::Document => None,
        };
        observe(&self.page, node).await?;
        let baseline = evaluate::<i64>(&self.page, &mutation_count_expression())
            .await?
            .max(0);
        let (tx, rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        let poller = spawn_poller(self.page.clone(), self.poll_interval, node, baseline, tx);
        self.pollers.lock().await.push(poller);
        Ok(rx)
    }
}

impl Drop for ChromiumoxideSource {
    fn drop(&mut self) {
        if let Ok(mut pollers) = self.pollers.try_lock() {
            for poller in pollers.drain(..) {
                poller.abort();
            }
        }
        if let Ok(mut guard) = self.browser.try_lock() {
            if let Some(state) = guard.take() {
                state.handler.abort();
            }
        }
    }
}

async fn inject(page: &Page) -> Result<(), SourceError> {
    let script = sidebar_dom_script();
    page.evaluate_on_new_document(script)
        .await
        .map_err(map_script_error)?;
    // Also evaluate now; the page may already be loaded.
    page.evaluate(script).await.map_err(map_script_error)?;
    Ok(())
}

async fn evaluate<T: DeserializeOwned>(page: &Page, expression: &str) -> Result<T, SourceError> {
    page.evaluate(expression)
        .await
        .map_err(map_script_error)?
        .into_value::<T>()
        .map_err(map_script_error)
}

/// Attach the observer to `node`, falling back to the body when that node is
/// gone.
async fn observe(page: &Page, node: Option<u64>) -> Result<(), SourceError> {
    let attached: bool = evaluate(page, &observe_expression(node)).await?;
    if attached || node.is_none() {
        return Ok(());
    }
    let attached: bool = evaluate(page, &observe_expression(None)).await?;
    if attached {
        Ok(())
    } else {
        Err(SourceError::Script("no element to observe".to_string()))
    }
}

fn spawn_poller(
    page: Page,
    poll_interval: Duration,
    node: Option<u64>,
    baseline: i64,
    tx: mpsc::Sender<MutationNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = baseline;
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let Ok(count) = evaluate::<i64>(&page, &mutation_count_expression()).await else {
                continue;
            };

            if count < 0 {
                // Helpers were reinstalled after a navigation and observe nothing yet.
                if observe(&page, node).await.is_ok() {
                    last = 0;
                    let _ = tx.try_send(MutationNotice { records: 1 });
                }
                continue;
            }

            if count > last {
                let notice = MutationNotice {
                    records: (count - last).unsigned_abs(),
                };
                last = count;
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(notice) {
                    break;
                }
            }
        }
    })
}

fn build_config(options: &LaunchOptions) -> Result<BrowserConfig, SourceError> {
    let mut builder = BrowserConfig::builder();

    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder.args(options.args.clone());

    let builder = if options.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(SourceError::Browser)
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::debug!("chromiumoxide handler error: {err}");
            }
        }
    })
}
