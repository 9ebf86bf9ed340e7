//! The sidebar's event loop.
//!
//! One task owns the [`ExtractionSession`] and reacts to four inputs: mutation
//! notices from the [`PageSource`], debounced inspection and extraction
//! timers, the one-shot startup timer, and user actions sent through a
//! [`WatcherHandle`]. Timers never touch state themselves; they post events
//! back into the loop.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clipboard::Clipboard;
use crate::config::{SidebarConfig, SidebarConfigError};
use crate::control::{ControlElementState, GenerationState};
use crate::debounce::Debouncer;
use crate::extract::ExtractionEngine;
use crate::logging::SidebarLogger;
use crate::metrics::{WatchMetrics, start_pass_timer};
use crate::render::{CopyFeedback, RenderCommand, RenderSurface};
use crate::session::{ExtractionOutcome, ExtractionSession};
use crate::source::{MutationNotice, PageSource, SourceError};
use crate::tracker::{GenerationTracker, Transition, WatchScope};
use crate::tree::{DomSnapshot, ObservedTree};

const ACTION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "id")]
pub enum UserAction {
    Toggle(String),
    Copy(String),
    Clear,
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Config(#[from] SidebarConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("watcher has stopped")]
    Closed,
    #[error("watcher task failed: {0}")]
    Join(String),
}

#[derive(Debug)]
enum Event {
    Inspect,
    /// Carries the clear epoch current when the pass was scheduled.
    Extract(u64),
    Startup,
    CopyReset(String),
}

/// Everything the loop needs before it starts.
pub struct SidebarWatcher {
    config: SidebarConfig,
    tracker: GenerationTracker,
    engine: ExtractionEngine,
    source: Arc<dyn PageSource>,
    surface: Box<dyn RenderSurface>,
    clipboard: Arc<dyn Clipboard>,
    logger: Arc<SidebarLogger>,
}

impl SidebarWatcher {
    pub fn new(
        config: SidebarConfig,
        source: Arc<dyn PageSource>,
        surface: Box<dyn RenderSurface>,
        clipboard: Arc<dyn Clipboard>,
        logger: Arc<SidebarLogger>,
    ) -> Result<Self, WatcherError> {
        config.validate()?;
        let selectors = config.selectors.compile()?;
        Ok(Self {
            tracker: GenerationTracker::new(&selectors, &config.run_labels),
            engine: ExtractionEngine::new(&selectors, config.min_item_chars),
            config,
            source,
            surface,
            clipboard,
            logger,
        })
    }

    /// Resolve the watch scope, start observing, and run the loop on its own
    /// task.
    pub async fn spawn(self) -> Result<WatcherHandle, WatcherError> {
        let tree = self.source.snapshot().await?;
        let scope = self.tracker.watch_scope(&tree);
        let mutations = self.source.watch(scope).await?;
        self.logger.info(
            "observing control for generation changes",
            Some("watch"),
            Some(json!({ "scope": scope })),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let (metrics_tx, metrics_rx) = watch::channel(WatchMetrics::default());

        let inspect = {
            let tx = events_tx.clone();
            Debouncer::new(self.config.inspect_debounce(), move |()| {
                let _ = tx.send(Event::Inspect);
            })
        };
        let extract = {
            let tx = events_tx.clone();
            Debouncer::new(self.config.settle_delay(), move |epoch| {
                let _ = tx.send(Event::Extract(epoch));
            })
        };
        let startup = {
            let tx = events_tx.clone();
            let grace = self.config.startup_grace();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(Event::Startup);
            })
        };

        let session = ExtractionSession::new(self.config.preview_lines);
        let watch_loop = WatchLoop {
            config: self.config,
            tracker: self.tracker,
            engine: self.engine,
            session,
            source: self.source,
            surface: self.surface,
            clipboard: self.clipboard,
            logger: self.logger,
            events_tx,
            inspect,
            extract,
            clear_epoch: 0,
            timers: vec![startup],
            metrics: WatchMetrics::default(),
            metrics_tx,
        };

        let task = tokio::spawn(watch_loop.run(mutations, events_rx, actions_rx));
        Ok(WatcherHandle {
            actions: actions_tx,
            metrics: metrics_rx,
            task,
        })
    }
}

/// Control surface of a running watcher. Dropping it stops the loop.
pub struct WatcherHandle {
    actions: mpsc::Sender<UserAction>,
    metrics: watch::Receiver<WatchMetrics>,
    task: JoinHandle<WatchMetrics>,
}

impl WatcherHandle {
    pub async fn send(&self, action: UserAction) -> Result<(), WatcherError> {
        self.actions
            .send(action)
            .await
            .map_err(|_| WatcherError::Closed)
    }

    pub async fn toggle(&self, id: impl Into<String>) -> Result<(), WatcherError> {
        self.send(UserAction::Toggle(id.into())).await
    }

    pub async fn copy(&self, id: impl Into<String>) -> Result<(), WatcherError> {
        self.send(UserAction::Copy(id.into())).await
    }

    pub async fn clear(&self) -> Result<(), WatcherError> {
        self.send(UserAction::Clear).await
    }

    /// Latest counters published by the loop.
    pub fn metrics(&self) -> WatchMetrics {
        self.metrics.borrow().clone()
    }

    /// Stop the loop and return its final counters.
    pub async fn shutdown(self) -> Result<WatchMetrics, WatcherError> {
        let WatcherHandle { actions, task, .. } = self;
        drop(actions);
        task.await.map_err(|err| WatcherError::Join(err.to_string()))
    }
}

struct WatchLoop {
    config: SidebarConfig,
    tracker: GenerationTracker,
    engine: ExtractionEngine,
    session: ExtractionSession,
    source: Arc<dyn PageSource>,
    surface: Box<dyn RenderSurface>,
    clipboard: Arc<dyn Clipboard>,
    logger: Arc<SidebarLogger>,
    events_tx: mpsc::UnboundedSender<Event>,
    inspect: Debouncer<()>,
    extract: Debouncer<u64>,
    clear_epoch: u64,
    timers: Vec<JoinHandle<()>>,
    metrics: WatchMetrics,
    metrics_tx: watch::Sender<WatchMetrics>,
}

impl WatchLoop {
    async fn run(
        mut self,
        mut mutations: mpsc::Receiver<MutationNotice>,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut actions: mpsc::Receiver<UserAction>,
    ) -> WatchMetrics {
        let mut observing = true;

        loop {
            tokio::select! {
                notice = mutations.recv(), if observing => match notice {
                    Some(notice) => self.on_mutation(notice),
                    None => {
                        observing = false;
                        self.logger.error("mutation notices stopped", Some("watch"), None);
                    }
                },
                Some(event) = events.recv() => match event {
                    Event::Inspect => self.on_inspect().await,
                    Event::Extract(epoch) => self.on_extract(epoch).await,
                    Event::Startup => self.on_startup().await,
                    Event::CopyReset(id) => self.surface.copy_feedback(&id, None),
                },
                action = actions.recv() => match action {
                    Some(action) => self.on_action(action).await,
                    None => break,
                },
            }
            self.metrics_tx.send_replace(self.metrics.clone());
        }

        self.shutdown();
        self.metrics
    }

    fn on_mutation(&mut self, notice: MutationNotice) {
        self.metrics.mutation_notices += 1;
        self.logger.debug(
            "mutation notice",
            Some("watch"),
            Some(json!({ "records": notice.records })),
        );
        self.inspect.trigger(());
    }

    async fn on_inspect(&mut self) {
        let Some(tree) = self.snapshot("inspection").await else {
            return;
        };
        self.metrics.inspections += 1;
        let classification = self.tracker.inspect(&tree);

        match self.tracker.apply(&mut self.session, classification) {
            Some(Transition::Started) => {
                self.metrics.transitions_started += 1;
                self.logger.info(
                    "generation started",
                    Some("tracker"),
                    Some(json!({ "control": classification })),
                );
                self.render("generation started");
            }
            Some(Transition::Finished) => {
                self.metrics.transitions_finished += 1;
                self.logger.info(
                    "generation finished, scheduling extraction",
                    Some("tracker"),
                    Some(json!({
                        "control": classification,
                        "settleMs": self.config.settle_delay_ms,
                    })),
                );
                self.extract.trigger(self.clear_epoch);
            }
            None => {}
        }
    }

    async fn on_extract(&mut self, epoch: u64) {
        // Scheduled before a clear; the timer may have fired already.
        if epoch != self.clear_epoch {
            self.logger.debug(
                "dropping extraction scheduled before clear",
                Some("extract"),
                None,
            );
            return;
        }
        let Some(tree) = self.snapshot("extraction").await else {
            return;
        };
        self.extract_from(&tree);
    }

    async fn on_startup(&mut self) {
        let Some(tree) = self.snapshot("startup").await else {
            return;
        };
        let classification = self.tracker.inspect(&tree);
        let state = self.tracker.initialize(&mut self.session, classification);
        self.logger.info(
            "initial generation state",
            Some("tracker"),
            Some(json!({ "control": classification, "state": state })),
        );

        if state == GenerationState::Idle && self.tracker.has_turns(&tree) {
            self.extract_from(&tree);
        } else {
            self.render("startup");
        }
    }

    fn extract_from(&mut self, tree: &dyn ObservedTree) {
        let started = start_pass_timer();
        let outcome = self.session.run_extraction(tree, &self.engine);
        self.metrics.record_extraction(&outcome, started.elapsed());

        let details = match &outcome {
            ExtractionOutcome::Committed {
                unit_changed,
                items,
            } => json!({
                "outcome": outcome.label(),
                "unitChanged": unit_changed,
                "items": items.len(),
                "unit": self.session.last_unit(),
            }),
            _ => json!({ "outcome": outcome.label() }),
        };
        self.logger
            .debug("extraction pass finished", Some("extract"), Some(details));

        if outcome.requires_render() || self.session.needs_render() {
            self.render(outcome.label());
        }
    }

    async fn on_action(&mut self, action: UserAction) {
        match action {
            UserAction::Toggle(id) => {
                if self.session.toggle_expansion(&id) {
                    self.render("toggle");
                } else {
                    self.logger.debug(
                        "toggle ignored",
                        Some("render"),
                        Some(json!({ "id": id })),
                    );
                }
            }
            UserAction::Copy(id) => self.copy(id).await,
            UserAction::Clear => {
                self.extract.cancel();
                self.clear_epoch = self.clear_epoch.wrapping_add(1);
                self.session.clear();
                self.logger.info("panel cleared", Some("watch"), None);
                self.render("clear");
            }
        }
    }

    async fn copy(&mut self, id: String) {
        let Some(text) = self.session.item(&id).map(|item| item.text.clone()) else {
            self.logger
                .debug("copy ignored", Some("copy"), Some(json!({ "id": id })));
            return;
        };

        let feedback = match self.clipboard.copy(&text).await {
            Ok(()) => CopyFeedback::Copied,
            Err(err) => {
                self.logger.error(
                    format!("copy failed: {err}"),
                    Some("copy"),
                    Some(json!({ "id": id })),
                );
                CopyFeedback::Failed
            }
        };
        self.metrics.record_copy(feedback == CopyFeedback::Copied);
        self.surface.copy_feedback(&id, Some(feedback));

        let tx = self.events_tx.clone();
        let delay = self.config.copy_feedback();
        self.timers.retain(|timer| !timer.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::CopyReset(id));
        }));
    }

    async fn snapshot(&mut self, purpose: &str) -> Option<DomSnapshot> {
        match self.source.snapshot().await {
            Ok(tree) => Some(tree),
            Err(err) => {
                self.metrics.snapshot_failures += 1;
                self.logger.error(
                    format!("snapshot for {purpose} failed: {err}"),
                    Some("watch"),
                    None,
                );
                None
            }
        }
    }

    fn render(&mut self, reason: &str) {
        let command: RenderCommand = self.session.project();
        match self.surface.render(&command) {
            Ok(()) => {
                self.metrics.record_render(true);
                self.logger.debug(
                    "panel rendered",
                    Some("render"),
                    Some(json!({
                        "reason": reason,
                        "placeholder": command.placeholder,
                        "records": command.records.len(),
                    })),
                );
                self.session.mark_rendered(command);
            }
            Err(err) => {
                self.metrics.record_render(false);
                self.logger
                    .error(format!("render failed: {err}"), Some("render"), None);
            }
        }
    }

    fn shutdown(&mut self) {
        self.inspect.cancel();
        self.extract.cancel();
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.logger.info("watcher stopped", Some("watch"), None);
    }
}

/// Summary of a single startup-style pass over a static tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub control: ControlElementState,
    pub state: GenerationState,
    pub scope: WatchScope,
    pub outcome: &'static str,
    pub render: RenderCommand,
}

/// Run the startup logic once against `tree`: classify the control, extract
/// when idle, and project the result.
pub fn inspect_once(
    config: &SidebarConfig,
    tree: &dyn ObservedTree,
) -> Result<InspectReport, WatcherError> {
    config.validate()?;
    let selectors = config.selectors.compile()?;
    let tracker = GenerationTracker::new(&selectors, &config.run_labels);
    let engine = ExtractionEngine::new(&selectors, config.min_item_chars);
    let mut session = ExtractionSession::new(config.preview_lines);

    let control = tracker.inspect(tree);
    let state = tracker.initialize(&mut session, control);
    let outcome = session.run_extraction(tree, &engine);

    Ok(InspectReport {
        control,
        state,
        scope: tracker.watch_scope(tree),
        outcome: outcome.label(),
        render: session.project(),
    })
}
