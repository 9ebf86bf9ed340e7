//! Render projection and the surface it is handed to.
//!
//! A [`RenderCommand`] is a full description of what the panel should show;
//! surfaces replace their contents wholesale on every call.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::ContentItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    Generating,
    NoItemsInLastTurn,
    NothingFound,
}

impl Placeholder {
    pub fn message(self) -> &'static str {
        match self {
            Placeholder::Generating => "Agent is generating code...",
            Placeholder::NoItemsInLastTurn => "No code blocks in the last turn.",
            Placeholder::NothingFound => "No code blocks found.",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// One panel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    pub id: String,
    pub language: String,
    pub title: String,
    pub preview_text: String,
    pub full_text: String,
    pub has_more: bool,
    pub is_expanded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<Placeholder>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub records: Vec<ViewRecord>,
}

impl RenderCommand {
    pub fn placeholder(placeholder: Placeholder) -> Self {
        Self {
            placeholder: Some(placeholder),
            records: Vec::new(),
        }
    }

    pub fn records(records: Vec<ViewRecord>) -> Self {
        Self {
            placeholder: None,
            records,
        }
    }

    pub fn shows_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn record(&self, id: &str) -> Option<&ViewRecord> {
        self.records.iter().find(|record| record.id == id)
    }
}

/// Inputs of a projection, borrowed from the session.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput<'a> {
    pub items: &'a [ContentItem],
    pub expansion: &'a HashMap<String, bool>,
    pub generating: bool,
    pub has_processed_unit: bool,
    pub preview_lines: usize,
}

/// Pure projection of session state into a render command.
pub fn project(input: ProjectionInput<'_>) -> RenderCommand {
    if input.items.is_empty() {
        let placeholder = if input.generating {
            Placeholder::Generating
        } else if input.has_processed_unit {
            Placeholder::NoItemsInLastTurn
        } else {
            Placeholder::NothingFound
        };
        return RenderCommand::placeholder(placeholder);
    }

    let records = input
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let (preview_text, has_more) = preview(&item.text, input.preview_lines);
            let expanded = input.expansion.get(&item.id).copied().unwrap_or(false);
            ViewRecord {
                id: item.id.clone(),
                language: item.language.clone(),
                title: format!("{} Block #{}", item.language, index + 1),
                preview_text,
                full_text: item.text.clone(),
                has_more,
                is_expanded: has_more && expanded,
            }
        })
        .collect();

    RenderCommand::records(records)
}

/// First `lines` lines of `text`, and whether anything was cut.
pub fn preview(text: &str, lines: usize) -> (String, bool) {
    let all: Vec<&str> = text.split('\n').collect();
    let has_more = all.len() > lines;
    (all[..all.len().min(lines)].join("\n"), has_more)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyFeedback {
    Copied,
    Failed,
}

impl CopyFeedback {
    pub fn label(self) -> &'static str {
        match self {
            CopyFeedback::Copied => "Copied!",
            CopyFeedback::Failed => "Error",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target is missing")]
    MissingTarget,
    #[error("failed to write render output: {0}")]
    Io(#[from] std::io::Error),
}

/// Where render commands end up.
pub trait RenderSurface: Send {
    fn render(&mut self, command: &RenderCommand) -> Result<(), RenderError>;

    /// Transient copy state of one entry; `None` resets it.
    fn copy_feedback(&mut self, id: &str, feedback: Option<CopyFeedback>);
}

/// Plain-text surface for terminals.
pub struct TextSurface<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> TextSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> RenderSurface for TextSurface<W> {
    fn render(&mut self, command: &RenderCommand) -> Result<(), RenderError> {
        writeln!(self.out, "── code sidebar ──")?;
        if let Some(placeholder) = command.placeholder {
            writeln!(self.out, "{placeholder}")?;
            return Ok(());
        }

        for record in &command.records {
            let marker = match (record.has_more, record.is_expanded) {
                (false, _) => ' ',
                (true, false) => '▶',
                (true, true) => '▼',
            };
            writeln!(self.out, "{marker} {} [{}]", record.title, record.id)?;
            let body = if record.is_expanded {
                &record.full_text
            } else {
                &record.preview_text
            };
            for line in body.lines() {
                writeln!(self.out, "    {line}")?;
            }
            if record.has_more && !record.is_expanded {
                writeln!(self.out, "    …")?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn copy_feedback(&mut self, id: &str, feedback: Option<CopyFeedback>) {
        if let Some(feedback) = feedback {
            let _ = writeln!(self.out, "[{id}] {}", feedback.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeId;

    fn item(n: usize, language: &str, text: &str) -> ContentItem {
        ContentItem {
            id: ContentItem::item_id(n),
            text: text.to_string(),
            language: language.to_string(),
            source: NodeId(n as u64),
        }
    }

    fn input<'a>(
        items: &'a [ContentItem],
        expansion: &'a HashMap<String, bool>,
        generating: bool,
        has_processed_unit: bool,
    ) -> ProjectionInput<'a> {
        ProjectionInput {
            items,
            expansion,
            generating,
            has_processed_unit,
            preview_lines: 5,
        }
    }

    #[test]
    fn placeholders_follow_state() {
        let expansion = HashMap::new();
        assert_eq!(
            project(input(&[], &expansion, true, true)),
            RenderCommand::placeholder(Placeholder::Generating)
        );
        assert_eq!(
            project(input(&[], &expansion, false, true)),
            RenderCommand::placeholder(Placeholder::NoItemsInLastTurn)
        );
        assert_eq!(
            project(input(&[], &expansion, false, false)),
            RenderCommand::placeholder(Placeholder::NothingFound)
        );
    }

    #[test]
    fn generating_keeps_existing_items_visible() {
        let items = vec![item(1, "Rust", "fn main() {}")];
        let expansion = HashMap::new();
        let command = project(input(&items, &expansion, true, true));
        assert!(!command.shows_placeholder());
        assert_eq!(command.records.len(), 1);
    }

    #[test]
    fn records_carry_titles_previews_and_expansion() {
        let long = (1..=7).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let items = vec![item(1, "Python", &long), item(2, "Code", "short snippet")];
        let mut expansion = HashMap::new();
        expansion.insert("code-item-1".to_string(), true);
        expansion.insert("code-item-2".to_string(), true);

        let command = project(input(&items, &expansion, false, true));
        let first = &command.records[0];
        assert_eq!(first.title, "Python Block #1");
        assert_eq!(first.preview_text, "line 1\nline 2\nline 3\nline 4\nline 5");
        assert!(first.has_more);
        assert!(first.is_expanded);

        let second = command.record("code-item-2").unwrap();
        assert_eq!(second.title, "Code Block #2");
        assert!(!second.has_more);
        assert!(!second.is_expanded);
    }

    #[test]
    fn preview_of_exactly_n_lines_has_nothing_more() {
        assert_eq!(preview("a\nb\nc", 3), ("a\nb\nc".to_string(), false));
        assert_eq!(preview("a\nb\nc\nd", 3), ("a\nb\nc".to_string(), true));
    }

    #[test]
    fn text_surface_prints_placeholder_and_records() {
        let mut surface = TextSurface::new(Vec::new());
        surface
            .render(&RenderCommand::placeholder(Placeholder::NothingFound))
            .unwrap();
        let items = vec![item(1, "Rust", "fn main() {\n}")];
        let command = project(input(&items, &HashMap::new(), false, true));
        surface.render(&command).unwrap();
        surface.copy_feedback("code-item-1", Some(CopyFeedback::Copied));

        let output = String::from_utf8(surface.into_inner()).unwrap();
        assert!(output.contains("No code blocks found."));
        assert!(output.contains("Rust Block #1 [code-item-1]"));
        assert!(output.contains("    fn main() {"));
        assert!(output.contains("[code-item-1] Copied!"));
    }
}
