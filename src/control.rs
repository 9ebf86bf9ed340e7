//! Classification of the host page's run/stop control.
//!
//! The host exposes no "generation finished" event, so generation state is
//! inferred from the control's label, icons, and disabled flags. The
//! classification is recomputed from scratch on every inspection.

use serde::{Deserialize, Serialize};

use crate::config::CompiledSelectors;
use crate::tree::{NodeId, ObservedTree, Selector};

/// What the control element currently says about the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlElementState {
    Generating,
    ReadyToRun,
    ReadyButDisabled,
    /// Disabled without a recognisable label; the page is busy loading or
    /// generating.
    DisabledAmbiguous,
    Unknown,
}

/// Machine state of the generation tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationState {
    Idle,
    Generating,
}

impl ControlElementState {
    /// The machine state this classification implies, or `None` when it
    /// should not move the machine.
    pub fn implied_state(self) -> Option<GenerationState> {
        match self {
            ControlElementState::Generating | ControlElementState::DisabledAmbiguous => {
                Some(GenerationState::Generating)
            }
            ControlElementState::ReadyToRun | ControlElementState::ReadyButDisabled => {
                Some(GenerationState::Idle)
            }
            ControlElementState::Unknown => None,
        }
    }
}

/// Reads the control element out of a tree and classifies it.
#[derive(Debug, Clone)]
pub struct ControlClassifier {
    control: Selector,
    label: Selector,
    stop_icon: Selector,
    spinner_icon: Selector,
    run_labels: Vec<String>,
}

impl ControlClassifier {
    pub fn new(selectors: &CompiledSelectors, run_labels: &[String]) -> Self {
        Self {
            control: selectors.control.clone(),
            label: selectors.control_label.clone(),
            stop_icon: selectors.stop_icon.clone(),
            spinner_icon: selectors.spinner_icon.clone(),
            run_labels: run_labels.iter().map(|label| label.to_lowercase()).collect(),
        }
    }

    pub fn locate<T: ObservedTree + ?Sized>(&self, tree: &T) -> Option<NodeId> {
        tree.query_first(&self.control)
    }

    pub fn inspect<T: ObservedTree + ?Sized>(&self, tree: &T) -> ControlElementState {
        self.classify(tree, self.locate(tree))
    }

    pub fn classify<T: ObservedTree + ?Sized>(
        &self,
        tree: &T,
        control: Option<NodeId>,
    ) -> ControlElementState {
        let Some(control) = control else {
            return ControlElementState::Unknown;
        };

        let disabled =
            tree.attribute(control, "aria-disabled") == Some("true") || tree.is_disabled(control);
        let label = tree
            .query_first_within(control, &self.label)
            .map(|node| tree.text_content(node).trim().to_lowercase())
            .unwrap_or_default();

        if label == "stop" {
            return ControlElementState::Generating;
        }

        if self.icon_visible(tree, control, &self.stop_icon)
            || self.icon_visible(tree, control, &self.spinner_icon)
        {
            return ControlElementState::Generating;
        }

        if self.run_labels.iter().any(|candidate| *candidate == label) {
            return ready(disabled);
        }

        if let Some(aria_label) = tree.attribute(control, "aria-label") {
            let aria_label = aria_label.to_lowercase();
            if aria_label.contains("stop") {
                return ControlElementState::Generating;
            }
            if aria_label.contains("run") {
                return ready(disabled);
            }
        }

        if disabled {
            ControlElementState::DisabledAmbiguous
        } else {
            ControlElementState::Unknown
        }
    }

    fn icon_visible<T: ObservedTree + ?Sized>(
        &self,
        tree: &T,
        control: NodeId,
        icon: &Selector,
    ) -> bool {
        tree.query_first_within(control, icon)
            .map(|node| tree.computed_display(node) != Some("none"))
            .unwrap_or(false)
    }
}

fn ready(disabled: bool) -> ControlElementState {
    if disabled {
        ControlElementState::ReadyButDisabled
    } else {
        ControlElementState::ReadyToRun
    }
}
