//! Locating the latest finished turn and collecting its code output.
//!
//! [`ExtractionEngine`] is stateless: it reads a tree and returns items. What
//! was seen before (and whether to re-render) is tracked by
//! [`ExtractionSession`](crate::session::ExtractionSession).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::CompiledSelectors;
use crate::tree::{NodeId, ObservedTree, Selector};

pub mod strategy;

pub use strategy::{
    ClassHintStrategy, DEFAULT_LANGUAGE, ExtractedText, ExtractionStrategy, HostCodeBlockStrategy,
};

/// One extracted code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// `code-item-N`, 1-based within the pass that produced it.
    pub id: String,
    pub text: String,
    pub language: String,
    /// Node the text was read from.
    pub source: NodeId,
}

impl ContentItem {
    pub fn item_id(sequence: usize) -> String {
        format!("code-item-{sequence}")
    }
}

#[derive(Debug)]
pub struct ExtractionEngine {
    turn: Selector,
    output_marker: Selector,
    candidates: Selector,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_item_chars: usize,
}

impl ExtractionEngine {
    /// Engine with the default strategy order: host code blocks first, then
    /// class hints for everything else.
    pub fn new(selectors: &CompiledSelectors, min_item_chars: usize) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(HostCodeBlockStrategy::new(
                selectors.code_block.clone(),
                selectors.code_block_text.clone(),
            )),
            Box::new(ClassHintStrategy),
        ];
        Self::with_strategies(selectors, min_item_chars, strategies)
    }

    pub fn with_strategies(
        selectors: &CompiledSelectors,
        min_item_chars: usize,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self {
            turn: selectors.turn.clone(),
            output_marker: selectors.output_marker.clone(),
            candidates: selectors.candidates.clone(),
            strategies,
            min_item_chars,
        }
    }

    pub fn min_item_chars(&self) -> usize {
        self.min_item_chars
    }

    /// Last turn container holding at least one output marker.
    pub fn locate_unit(&self, tree: &dyn ObservedTree) -> Option<NodeId> {
        tree.query_all(&self.turn)
            .into_iter()
            .filter(|turn| tree.query_first_within(*turn, &self.output_marker).is_some())
            .last()
    }

    /// Extract deduplicated items from `unit`, in document order.
    ///
    /// Nested candidates (a `pre` and its inner `code`, say) usually carry the
    /// same text; only the first occurrence survives.
    pub fn collect(&self, tree: &dyn ObservedTree, unit: NodeId) -> Vec<ContentItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for node in tree.query_all(&self.candidates) {
            if !tree.contains(unit, node) {
                continue;
            }
            let Some(strategy) = self
                .strategies
                .iter()
                .find(|strategy| strategy.applies(tree, node))
            else {
                continue;
            };

            let ExtractedText { text, language } = strategy.extract(tree, node);
            if text.chars().count() < self.min_item_chars || seen.contains(&text) {
                continue;
            }
            seen.insert(text.clone());

            items.push(ContentItem {
                id: ContentItem::item_id(items.len() + 1),
                text,
                language,
                source: node,
            });
        }

        items
    }
}

/// Whether two item lists differ in length or in any pairwise
/// `(source, text, language)`.
pub fn items_differ(current: &[ContentItem], next: &[ContentItem]) -> bool {
    current.len() != next.len()
        || current.iter().zip(next).any(|(a, b)| {
            a.source != b.source || a.text != b.text || a.language != b.language
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostSelectors;
    use crate::tree::{DomSnapshot, SnapshotElement as E};

    fn engine() -> ExtractionEngine {
        let selectors = HostSelectors::default().compile().unwrap();
        ExtractionEngine::new(&selectors, 10)
    }

    fn code_block(id: u64, language: &str, text: &str) -> E {
        E::new("ms-code-block")
            .with_id(id)
            .attr("language", language)
            .child(E::new("pre").with_id(id + 1).child(E::new("code").with_id(id + 2).text(text)))
    }

    fn page() -> DomSnapshot {
        DomSnapshot::from_root(
            E::new("body")
                .with_id(1)
                .child(
                    E::new("ms-chat-turn")
                        .with_id(10)
                        .child(code_block(11, "rust", "fn old_turn() {}")),
                )
                .child(E::new("ms-chat-turn").with_id(20).text("user question"))
                .child(
                    E::new("ms-chat-turn")
                        .with_id(30)
                        .child(code_block(31, "python", "print('first block')"))
                        .child(E::new("p").with_id(40).text("some prose"))
                        .child(code_block(41, "python", "print('first block')"))
                        .child(
                            E::new("pre")
                                .with_id(50)
                                .class("language-sql")
                                .text("SELECT * FROM t;"),
                        )
                        .child(E::new("code").with_id(60).text("x = 1")),
                )
                .child(E::new("ms-chat-turn").with_id(70).text("trailing user turn")),
        )
    }

    #[test]
    fn locate_unit_takes_last_turn_with_output() {
        assert_eq!(engine().locate_unit(&page()), Some(NodeId(30)));

        let no_output = DomSnapshot::from_root(
            E::new("body")
                .with_id(1)
                .child(E::new("ms-chat-turn").with_id(2).text("hi")),
        );
        assert_eq!(engine().locate_unit(&no_output), None);
    }

    #[test]
    fn collect_dedups_filters_and_numbers_items() {
        let tree = page();
        let items = engine().collect(&tree, NodeId(30));

        let summary: Vec<_> = items
            .iter()
            .map(|item| (item.id.as_str(), item.language.as_str(), item.text.as_str(), item.source))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("code-item-1", "Python", "print('first block')", NodeId(31)),
                ("code-item-2", "Sql", "SELECT * FROM t;", NodeId(50)),
            ]
        );
    }

    #[test]
    fn collect_ignores_candidates_outside_the_unit() {
        let tree = page();
        let items = engine().collect(&tree, NodeId(10));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "fn old_turn() {}");
        assert_eq!(items[0].language, "Rust");
    }

    #[test]
    fn items_never_shorter_than_minimum_and_texts_unique() {
        let tree = page();
        let items = engine().collect(&tree, NodeId(30));
        let unique: HashSet<_> = items.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(unique.len(), items.len());
        assert!(items.iter().all(|item| item.text.chars().count() >= 10));
    }

    #[test]
    fn exact_minimum_length_is_kept() {
        let tree = DomSnapshot::from_root(
            E::new("ms-chat-turn")
                .with_id(1)
                .child(E::new("ms-code-block").with_id(2).child(E::new("pre").text("0123456789")))
                .child(E::new("ms-code-block").with_id(3).child(E::new("pre").text("012345678"))),
        );
        let items = engine().collect(&tree, NodeId(1));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "0123456789");
        assert_eq!(items[0].language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn change_detection_compares_pairwise() {
        let item = |source: u64, text: &str| ContentItem {
            id: ContentItem::item_id(1),
            text: text.to_string(),
            language: "Code".to_string(),
            source: NodeId(source),
        };
        let current = vec![item(1, "alpha block")];

        assert!(!items_differ(&current, &[item(1, "alpha block")]));
        assert!(items_differ(&current, &[item(2, "alpha block")]));
        assert!(items_differ(&current, &[item(1, "alpha block!")]));
        assert!(items_differ(&current, &[]));

        let mut relabelled = item(1, "alpha block");
        relabelled.language = "Rust".to_string();
        assert!(items_differ(&current, &[relabelled]));
    }
}
