//! The single owner of extraction state.
//!
//! Holds the generation flag, the current item set, the last processed unit,
//! per-item expansion, and the last command a surface accepted. Extraction and
//! rendering decisions are made against this state only.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extract::{ContentItem, ExtractionEngine, items_differ};
use crate::render::{ProjectionInput, RenderCommand, project};
use crate::tree::{NodeId, ObservedTree};

/// Result of one [`ExtractionSession::run_extraction`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Generation restarted before the pass ran; nothing was read.
    Deferred,
    /// No turn holds output and nothing was held before.
    NoUnit,
    /// No turn holds output any more; previous state was dropped.
    Cleared,
    /// Same unit already shown with items.
    Skipped,
    /// Re-extracted, identical to what is held.
    Unchanged,
    Committed {
        unit_changed: bool,
        items: Arc<[ContentItem]>,
    },
}

impl ExtractionOutcome {
    /// Whether the outcome always calls for a render.
    pub fn requires_render(&self) -> bool {
        matches!(
            self,
            ExtractionOutcome::Cleared | ExtractionOutcome::Committed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtractionOutcome::Deferred => "deferred",
            ExtractionOutcome::NoUnit => "no_unit",
            ExtractionOutcome::Cleared => "cleared",
            ExtractionOutcome::Skipped => "skipped",
            ExtractionOutcome::Unchanged => "unchanged",
            ExtractionOutcome::Committed { .. } => "committed",
        }
    }
}

#[derive(Debug)]
pub struct ExtractionSession {
    generating: bool,
    items: Arc<[ContentItem]>,
    last_unit: Option<NodeId>,
    expansion: HashMap<String, bool>,
    last_rendered: Option<RenderCommand>,
    preview_lines: usize,
}

impl ExtractionSession {
    pub fn new(preview_lines: usize) -> Self {
        Self {
            generating: false,
            items: Arc::from(Vec::new()),
            last_unit: None,
            expansion: HashMap::new(),
            last_rendered: None,
            preview_lines,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn set_generating(&mut self, generating: bool) {
        self.generating = generating;
    }

    pub fn items(&self) -> Arc<[ContentItem]> {
        Arc::clone(&self.items)
    }

    pub fn item(&self, id: &str) -> Option<&ContentItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn last_unit(&self) -> Option<NodeId> {
        self.last_unit
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expansion.get(id).copied().unwrap_or(false)
    }

    pub fn last_rendered(&self) -> Option<&RenderCommand> {
        self.last_rendered.as_ref()
    }

    pub fn run_extraction(
        &mut self,
        tree: &dyn ObservedTree,
        engine: &ExtractionEngine,
    ) -> ExtractionOutcome {
        if self.generating {
            return ExtractionOutcome::Deferred;
        }

        let Some(unit) = engine.locate_unit(tree) else {
            if self.last_unit.is_some() || !self.items.is_empty() {
                self.items = Arc::from(Vec::new());
                self.last_unit = None;
                self.expansion.clear();
                return ExtractionOutcome::Cleared;
            }
            return ExtractionOutcome::NoUnit;
        };

        let placeholder_shown = self
            .last_rendered
            .as_ref()
            .is_some_and(RenderCommand::shows_placeholder);
        if self.last_unit == Some(unit) && !self.items.is_empty() && !placeholder_shown {
            return ExtractionOutcome::Skipped;
        }

        let collected = engine.collect(tree, unit);
        let unit_changed = self.last_unit != Some(unit);
        if !unit_changed && !items_differ(&self.items, &collected) {
            return ExtractionOutcome::Unchanged;
        }

        self.items = Arc::from(collected);
        if unit_changed {
            self.expansion.clear();
        }
        self.last_unit = Some(unit);

        ExtractionOutcome::Committed {
            unit_changed,
            items: Arc::clone(&self.items),
        }
    }

    pub fn project(&self) -> RenderCommand {
        project(ProjectionInput {
            items: &self.items,
            expansion: &self.expansion,
            generating: self.generating,
            has_processed_unit: self.last_unit.is_some(),
            preview_lines: self.preview_lines,
        })
    }

    /// Flip expansion of an item whose text exceeds the preview. Returns
    /// `false` for unknown or short items.
    pub fn toggle_expansion(&mut self, id: &str) -> bool {
        let Some(item) = self.item(id) else {
            return false;
        };
        if item.text.split('\n').count() <= self.preview_lines {
            return false;
        }
        let entry = self.expansion.entry(id.to_string()).or_insert(false);
        *entry = !*entry;
        true
    }

    /// Drop items, expansion, last unit, and the generation flag.
    pub fn clear(&mut self) {
        self.items = Arc::from(Vec::new());
        self.expansion.clear();
        self.last_unit = None;
        self.generating = false;
    }

    /// Record the command a surface accepted.
    pub fn mark_rendered(&mut self, command: RenderCommand) {
        self.last_rendered = Some(command);
    }

    /// Whether the current projection differs from what was last shown.
    pub fn needs_render(&self) -> bool {
        self.last_rendered.as_ref() != Some(&self.project())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostSelectors;
    use crate::render::Placeholder;
    use crate::tree::{DomSnapshot, SnapshotElement as E};

    fn engine() -> ExtractionEngine {
        ExtractionEngine::new(&HostSelectors::default().compile().unwrap(), 10)
    }

    fn turn(id: u64, blocks: &[(u64, &str)]) -> E {
        blocks.iter().fold(E::new("ms-chat-turn").with_id(id), |turn, (block, text)| {
            turn.child(
                E::new("ms-code-block")
                    .with_id(*block)
                    .child(E::new("pre").with_id(block + 1).text(*text)),
            )
        })
    }

    fn page(turns: Vec<E>) -> DomSnapshot {
        let body = turns
            .into_iter()
            .fold(E::new("body").with_id(1), |body, turn| body.child(turn));
        DomSnapshot::from_root(body)
    }

    fn long_text() -> String {
        (1..=8).map(|n| format!("println!(\"{n}\");")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn deferred_while_generating() {
        let mut session = ExtractionSession::new(5);
        session.set_generating(true);
        let tree = page(vec![turn(10, &[(11, "fn main() { }")])]);
        assert_eq!(session.run_extraction(&tree, &engine()), ExtractionOutcome::Deferred);
        assert!(session.items().is_empty());
    }

    #[test]
    fn no_unit_then_cleared() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        let empty = page(vec![]);
        assert_eq!(session.run_extraction(&empty, &engine), ExtractionOutcome::NoUnit);

        let tree = page(vec![turn(10, &[(11, "fn main() { }")])]);
        assert!(matches!(
            session.run_extraction(&tree, &engine),
            ExtractionOutcome::Committed { unit_changed: true, .. }
        ));

        assert_eq!(session.run_extraction(&empty, &engine), ExtractionOutcome::Cleared);
        assert!(session.items().is_empty());
        assert_eq!(session.last_unit(), None);
        assert_eq!(session.run_extraction(&empty, &engine), ExtractionOutcome::NoUnit);
    }

    #[test]
    fn repeated_pass_is_idempotent() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        let tree = page(vec![turn(10, &[(11, "fn main() { }"), (13, "let x = 42;")])]);

        let ExtractionOutcome::Committed { items, .. } = session.run_extraction(&tree, &engine)
        else {
            panic!("first pass should commit");
        };
        assert_eq!(items.len(), 2);
        session.mark_rendered(session.project());

        assert_eq!(session.run_extraction(&tree, &engine), ExtractionOutcome::Skipped);
        assert_eq!(session.items().len(), 2);
        assert!(!session.needs_render());
    }

    #[test]
    fn placeholder_on_screen_forces_recompute() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        let tree = page(vec![turn(10, &[(11, "fn main() { }")])]);

        session.run_extraction(&tree, &engine);
        // The render after the commit never landed; the panel still shows a placeholder.
        session.mark_rendered(RenderCommand::placeholder(Placeholder::Generating));

        assert_eq!(session.run_extraction(&tree, &engine), ExtractionOutcome::Unchanged);
        assert!(session.needs_render());
    }

    #[test]
    fn same_unit_with_new_content_commits_and_keeps_expansion() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        let long = long_text();

        let first = page(vec![turn(10, &[(11, long.as_str())])]);
        session.run_extraction(&first, &engine);
        assert!(session.toggle_expansion("code-item-1"));

        // Only a placeholder on screen lets a pass re-read a unit it already holds.
        session.mark_rendered(RenderCommand::placeholder(Placeholder::NoItemsInLastTurn));
        let grown = page(vec![turn(10, &[(11, long.as_str()), (13, "let y = 1000;")])]);
        assert!(matches!(
            session.run_extraction(&grown, &engine),
            ExtractionOutcome::Committed { unit_changed: false, .. }
        ));
        assert_eq!(session.items().len(), 2);
        assert!(session.is_expanded("code-item-1"));
    }

    #[test]
    fn new_unit_resets_expansion() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        let long = long_text();

        session.run_extraction(&page(vec![turn(10, &[(11, long.as_str())])]), &engine);
        session.toggle_expansion("code-item-1");
        assert!(session.is_expanded("code-item-1"));

        let next = page(vec![turn(10, &[(11, long.as_str())]), turn(20, &[(21, long.as_str())])]);
        assert!(matches!(
            session.run_extraction(&next, &engine),
            ExtractionOutcome::Committed { unit_changed: true, .. }
        ));
        assert_eq!(session.last_unit(), Some(NodeId(20)));
        assert!(!session.is_expanded("code-item-1"));
    }

    #[test]
    fn toggle_ignores_short_and_unknown_items() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        session.run_extraction(&page(vec![turn(10, &[(11, "fn main() { }")])]), &engine);

        assert!(!session.toggle_expansion("code-item-1"));
        assert!(!session.toggle_expansion("code-item-9"));
        assert!(!session.is_expanded("code-item-1"));
    }

    #[test]
    fn clear_drops_everything_but_keeps_rendered_view() {
        let engine = engine();
        let mut session = ExtractionSession::new(5);
        session.run_extraction(&page(vec![turn(10, &[(11, "fn main() { }")])]), &engine);
        session.mark_rendered(session.project());
        session.set_generating(true);

        session.clear();
        assert!(!session.is_generating());
        assert!(session.items().is_empty());
        assert_eq!(session.last_unit(), None);
        assert_eq!(
            session.project(),
            RenderCommand::placeholder(Placeholder::NothingFound)
        );
        assert!(session.needs_render());
    }
}
