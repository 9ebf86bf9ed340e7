//! Read-only view over the host page's document tree.
//!
//! The sidebar never owns the document it watches. Everything the core needs
//! is expressed through [`ObservedTree`]: element traversal, attribute and
//! computed-style reads, and selector queries built on top of them.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod selector;
pub mod snapshot;

pub use selector::{Complex, Compound, Selector, SelectorError};
pub use snapshot::{
    DomSnapshot, FlatElement, FlatEntry, FlatSnapshot, SnapshotElement, SnapshotError, SnapshotNode,
};

/// Stable identity of an element for the lifetime of the underlying DOM node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Query surface over an externally-owned element tree.
pub trait ObservedTree {
    fn root(&self) -> Option<NodeId>;

    /// Element children in document order.
    fn children(&self, node: NodeId) -> &[NodeId];

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Lowercase tag name.
    fn tag_name(&self, node: NodeId) -> Option<&str>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Computed `display` value, when the source captured one.
    fn computed_display(&self, node: NodeId) -> Option<&str>;

    /// The element's `disabled` property (distinct from `aria-disabled`).
    fn is_disabled(&self, node: NodeId) -> bool;

    /// Concatenated text of every descendant text node.
    fn text_content(&self, node: NodeId) -> String;

    fn class_list(&self, node: NodeId) -> Vec<&str> {
        self.attribute(node, "class")
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Descendants of `scope` in document order, excluding `scope` itself.
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// DOM `contains` semantics: a node contains itself.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector
            .alternatives()
            .iter()
            .any(|complex| matches_complex(self, node, complex))
    }

    /// Every element in the document matching `selector`, in document order.
    fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        std::iter::once(root)
            .chain(self.descendants(root))
            .filter(|node| self.matches(*node, selector))
            .collect()
    }

    fn query_first(&self, selector: &Selector) -> Option<NodeId> {
        self.query_all(selector).into_iter().next()
    }

    /// Descendants of `scope` matching `selector`. Like `Element.querySelectorAll`,
    /// ancestors outside the scope still take part in matching.
    fn query_within(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| self.matches(*node, selector))
            .collect()
    }

    fn query_first_within(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|node| self.matches(*node, selector))
    }
}

fn matches_compound<T: ObservedTree + ?Sized>(tree: &T, node: NodeId, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if tree.tag_name(node) != Some(tag.as_str()) {
            return false;
        }
    }
    if !compound.classes.is_empty() {
        let classes = tree.class_list(node);
        if !compound
            .classes
            .iter()
            .all(|class| classes.contains(&class.as_str()))
        {
            return false;
        }
    }
    compound.attributes.iter().all(|attr| {
        match (tree.attribute(node, &attr.name), attr.value.as_deref()) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    })
}

// Right-to-left: the last compound must match the node itself, earlier ones
// match some ancestor each. Greedy ancestor matching is exact for chains that
// only use the descendant combinator.
fn matches_complex<T: ObservedTree + ?Sized>(tree: &T, node: NodeId, complex: &Complex) -> bool {
    let Some((last, rest)) = complex.compounds.split_last() else {
        return false;
    };
    if !matches_compound(tree, node, last) {
        return false;
    }

    let mut ancestor = tree.parent(node);
    for compound in rest.iter().rev() {
        loop {
            match ancestor {
                Some(candidate) => {
                    ancestor = tree.parent(candidate);
                    if matches_compound(tree, candidate, compound) {
                        break;
                    }
                }
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::snapshot::SnapshotElement as E;

    fn sample() -> DomSnapshot {
        DomSnapshot::from_root(
            E::new("body").with_id(1).child(
                E::new("div")
                    .with_id(2)
                    .class("button-wrapper")
                    .child(
                        E::new("run-button").with_id(3).child(
                            E::new("button")
                                .with_id(4)
                                .attr("aria-label", "Run")
                                .child(E::new("span").with_id(5).class("label").text("Run"))
                                .child(
                                    E::new("svg")
                                        .with_id(6)
                                        .child(E::new("rect").with_id(7).class("stoppable-stop")),
                                ),
                        ),
                    ),
            ),
        )
    }

    #[test]
    fn query_all_respects_descendant_chains() {
        let tree = sample();
        let selector = Selector::parse("div.button-wrapper run-button").unwrap();
        assert_eq!(tree.query_all(&selector), vec![NodeId(3)]);

        let selector = Selector::parse("run-button button").unwrap();
        assert_eq!(tree.query_first(&selector), Some(NodeId(4)));

        let selector = Selector::parse("section run-button").unwrap();
        assert!(tree.query_all(&selector).is_empty());
    }

    #[test]
    fn query_within_matches_against_outer_ancestors() {
        let tree = sample();
        let selector = Selector::parse("svg rect.stoppable-stop").unwrap();
        assert_eq!(tree.query_first_within(NodeId(4), &selector), Some(NodeId(7)));
        assert_eq!(tree.query_first_within(NodeId(5), &selector), None);
    }

    #[test]
    fn contains_includes_self_and_descendants_only() {
        let tree = sample();
        assert!(tree.contains(NodeId(2), NodeId(7)));
        assert!(tree.contains(NodeId(4), NodeId(4)));
        assert!(!tree.contains(NodeId(5), NodeId(7)));
    }

    #[test]
    fn attribute_selectors_compare_values() {
        let tree = sample();
        let exact = Selector::parse("[aria-label=Run]").unwrap();
        let present = Selector::parse("button[aria-label]").unwrap();
        let wrong = Selector::parse("[aria-label=Stop]").unwrap();
        assert_eq!(tree.query_all(&exact), vec![NodeId(4)]);
        assert_eq!(tree.query_all(&present), vec![NodeId(4)]);
        assert!(tree.query_all(&wrong).is_empty());
    }
}
