//! Per-node extraction strategies.
//!
//! Candidates are offered to each strategy in order; the first one that
//! claims a node decides its text and language.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::tree::{NodeId, ObservedTree, Selector};

/// Language label used when a node carries no hint.
pub const DEFAULT_LANGUAGE: &str = "Code";

static CLASS_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"language-(\w+)|lang-(\w+)").expect("class hint pattern is valid")
});

/// Raw text and language read off a single candidate node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub language: String,
}

pub trait ExtractionStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, tree: &dyn ObservedTree, node: NodeId) -> bool;

    fn extract(&self, tree: &dyn ObservedTree, node: NodeId) -> ExtractedText;
}

/// The host's dedicated code block element.
///
/// Text comes from the first inner node matching one of `text_sources`, else
/// from the element itself. Language comes from its `language`,
/// `data-language` or `lang` attribute.
#[derive(Debug, Clone)]
pub struct HostCodeBlockStrategy {
    code_block: Selector,
    text_sources: Vec<Selector>,
}

impl HostCodeBlockStrategy {
    pub fn new(code_block: Selector, text_sources: Vec<Selector>) -> Self {
        Self {
            code_block,
            text_sources,
        }
    }
}

impl ExtractionStrategy for HostCodeBlockStrategy {
    fn name(&self) -> &'static str {
        "host-code-block"
    }

    fn applies(&self, tree: &dyn ObservedTree, node: NodeId) -> bool {
        tree.matches(node, &self.code_block)
    }

    fn extract(&self, tree: &dyn ObservedTree, node: NodeId) -> ExtractedText {
        let source = self
            .text_sources
            .iter()
            .find_map(|selector| tree.query_first_within(node, selector))
            .unwrap_or(node);

        let language = ["language", "data-language", "lang"]
            .iter()
            .find_map(|name| tree.attribute(node, name).filter(|value| !value.is_empty()))
            .map(capitalize)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        ExtractedText {
            text: tree.text_content(source).trim().to_string(),
            language,
        }
    }
}

/// Any other candidate: own text, language from a `language-x`/`lang-x`
/// class on the node, or on its parent when the node has no class at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassHintStrategy;

impl ExtractionStrategy for ClassHintStrategy {
    fn name(&self) -> &'static str {
        "class-hint"
    }

    fn applies(&self, _tree: &dyn ObservedTree, _node: NodeId) -> bool {
        true
    }

    fn extract(&self, tree: &dyn ObservedTree, node: NodeId) -> ExtractedText {
        let class_name = tree
            .attribute(node, "class")
            .filter(|value| !value.is_empty())
            .or_else(|| {
                tree.parent(node)
                    .and_then(|parent| tree.attribute(parent, "class"))
            })
            .unwrap_or_default();

        ExtractedText {
            text: tree.text_content(node).trim().to_string(),
            language: language_from_class(class_name)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        }
    }
}

pub(crate) fn language_from_class(class_name: &str) -> Option<String> {
    let captures = CLASS_HINT.captures(class_name)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|hint| capitalize(hint.as_str()))
}

/// Upper-case the first character, leave the rest alone.
pub(crate) fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DomSnapshot, SnapshotElement as E};

    #[test]
    fn capitalize_only_touches_first_character() {
        assert_eq!(capitalize("python"), "Python");
        assert_eq!(capitalize("typeScript"), "TypeScript");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn class_hint_prefers_language_prefix() {
        assert_eq!(language_from_class("hljs language-rust").as_deref(), Some("Rust"));
        assert_eq!(language_from_class("lang-go wrap").as_deref(), Some("Go"));
        assert_eq!(language_from_class("highlight"), None);
    }

    #[test]
    fn host_block_reads_inner_pre_and_language_attribute() {
        let tree = DomSnapshot::from_root(
            E::new("ms-code-block")
                .with_id(1)
                .attr("data-language", "bash")
                .child(E::new("span").with_id(2).text("bash  copy"))
                .child(E::new("pre").with_id(3).text("  echo hello world \n")),
        );
        let strategy = HostCodeBlockStrategy::new(
            Selector::parse("ms-code-block").unwrap(),
            vec![Selector::parse("pre").unwrap(), Selector::parse("code").unwrap()],
        );

        assert!(strategy.applies(&tree, NodeId(1)));
        assert!(!strategy.applies(&tree, NodeId(3)));
        assert_eq!(
            strategy.extract(&tree, NodeId(1)),
            ExtractedText {
                text: "echo hello world".to_string(),
                language: "Bash".to_string(),
            }
        );
    }

    #[test]
    fn host_block_without_inner_text_source_uses_itself() {
        let tree = DomSnapshot::from_root(
            E::new("ms-code-block").with_id(1).text("plain block text"),
        );
        let strategy =
            HostCodeBlockStrategy::new(Selector::parse("ms-code-block").unwrap(), Vec::new());

        let extracted = strategy.extract(&tree, NodeId(1));
        assert_eq!(extracted.text, "plain block text");
        assert_eq!(extracted.language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn class_hint_falls_back_to_parent_only_without_own_class() {
        let tree = DomSnapshot::from_root(
            E::new("div").with_id(1).child(
                E::new("pre")
                    .with_id(2)
                    .class("language-python")
                    .child(E::new("code").with_id(3).text("print('hi')"))
                    .child(E::new("code").with_id(4).class("inline").text("x = 1")),
            ),
        );

        let inherited = ClassHintStrategy.extract(&tree, NodeId(3));
        assert_eq!(inherited.language, "Python");

        let own_class = ClassHintStrategy.extract(&tree, NodeId(4));
        assert_eq!(own_class.language, DEFAULT_LANGUAGE);
    }
}
