//! Generation state machine.
//!
//! Two states, `Idle` and `Generating`, driven by control classifications.
//! The machine itself keeps no state: the generation flag lives on the
//! [`ExtractionSession`] so every component reads the same value.

use serde::{Deserialize, Serialize};

use crate::config::CompiledSelectors;
use crate::control::{ControlClassifier, ControlElementState, GenerationState};
use crate::session::ExtractionSession;
use crate::tree::{NodeId, ObservedTree, Selector};

/// Edge reported by [`GenerationTracker::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Idle → generating. The panel shows a placeholder if it has nothing yet.
    Started,
    /// Generating → idle. The only edge that schedules an extraction pass.
    Finished,
}

/// Subtree the mutation observer should be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "node")]
pub enum WatchScope {
    Node(NodeId),
    Document,
}

#[derive(Debug, Clone)]
pub struct GenerationTracker {
    classifier: ControlClassifier,
    turn: Selector,
    watch_scopes: Vec<Selector>,
}

impl GenerationTracker {
    pub fn new(selectors: &CompiledSelectors, run_labels: &[String]) -> Self {
        Self {
            classifier: ControlClassifier::new(selectors, run_labels),
            turn: selectors.turn.clone(),
            watch_scopes: selectors.watch_scopes.clone(),
        }
    }

    pub fn inspect<T: ObservedTree + ?Sized>(&self, tree: &T) -> ControlElementState {
        self.classifier.inspect(tree)
    }

    /// Feed one classification into the machine.
    pub fn apply(
        &self,
        session: &mut ExtractionSession,
        classification: ControlElementState,
    ) -> Option<Transition> {
        match (classification.implied_state(), session.is_generating()) {
            (Some(GenerationState::Generating), false) => {
                session.set_generating(true);
                Some(Transition::Started)
            }
            (Some(GenerationState::Idle), true) => {
                session.set_generating(false);
                Some(Transition::Finished)
            }
            _ => None,
        }
    }

    /// Startup inspection: set the flag directly, without reporting an edge.
    /// An unknown classification starts the machine idle.
    pub fn initialize(
        &self,
        session: &mut ExtractionSession,
        classification: ControlElementState,
    ) -> GenerationState {
        let state = classification
            .implied_state()
            .unwrap_or(GenerationState::Idle);
        session.set_generating(state == GenerationState::Generating);
        state
    }

    /// Whether the page already shows any turn containers.
    pub fn has_turns<T: ObservedTree + ?Sized>(&self, tree: &T) -> bool {
        tree.query_first(&self.turn).is_some()
    }

    /// First configured scope present in the tree, else the whole document.
    pub fn watch_scope<T: ObservedTree + ?Sized>(&self, tree: &T) -> WatchScope {
        self.watch_scopes
            .iter()
            .find_map(|selector| tree.query_first(selector))
            .map(WatchScope::Node)
            .unwrap_or(WatchScope::Document)
    }
}
