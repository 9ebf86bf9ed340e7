//! Point-in-time copy of the host document.
//!
//! Snapshots arrive in one of two JSON shapes and are loaded into an arena that
//! implements [`ObservedTree`]:
//!
//! * the flat format produced by the embedded page script: `{"nodes": [...]}`
//!   with one entry per element or text run, parents before children and
//!   siblings in document order. Its nesting depth is constant no matter how
//!   deep the page is.
//! * the nested format (one object per element with a `children` array),
//!   convenient for hand-written fixtures.
//!
//! Element ids are preserved so the same DOM node keeps the same [`NodeId`]
//! across snapshots. Construction never recurses, so very deep documents are
//! fine once they are parsed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{NodeId, ObservedTree};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot is neither flat ({flat}) nor nested ({nested})")]
    Format {
        flat: serde_json::Error,
        nested: serde_json::Error,
    },
    #[error("snapshot node id {0} appears twice")]
    DuplicateId(u64),
    #[error("snapshot entry refers to unknown parent {0}")]
    UnknownParent(u64),
    #[error("snapshot has a second root element {0}")]
    MultipleRoots(u64),
}

/// Flat wire format written by the page script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatSnapshot {
    pub nodes: Vec<FlatEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlatEntry {
    Text { parent: u64, text: String },
    Element(FlatElement),
}

/// One element of a [`FlatSnapshot`]; only the root has no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatElement {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Serialised form of one node in the nested format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotNode {
    Text { text: String },
    Element(SnapshotElement),
}

impl From<SnapshotElement> for SnapshotNode {
    fn from(value: SnapshotElement) -> Self {
        SnapshotNode::Element(value)
    }
}

/// Serialised form of one element and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            attrs: BTreeMap::new(),
            display: None,
            disabled: false,
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Append a class to the `class` attribute.
    pub fn class(mut self, class: &str) -> Self {
        let entry = self.attrs.entry("class".to_string()).or_default();
        if !entry.is_empty() {
            entry.push(' ');
        }
        entry.push_str(class);
        self
    }

    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(SnapshotNode::Text { text: text.into() });
        self
    }

    pub fn child(mut self, child: impl Into<SnapshotNode>) -> Self {
        self.children.push(child.into());
        self
    }
}

#[derive(Debug, Clone)]
enum Content {
    Text(String),
    Element(NodeId),
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    tag: String,
    attrs: BTreeMap<String, String>,
    display: Option<String>,
    disabled: bool,
    children: Vec<NodeId>,
    content: Vec<Content>,
}

/// Flattened, queryable snapshot.
#[derive(Debug, Clone, Default)]
pub struct DomSnapshot {
    nodes: Vec<NodeData>,
    index: HashMap<NodeId, usize>,
    root: Option<NodeId>,
}

impl DomSnapshot {
    /// Snapshot of a page with no document body yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a nested tree. Elements without an id, or repeating one already
    /// used, get fresh ids that collide with no explicit id in the tree.
    pub fn from_root(root: SnapshotElement) -> Self {
        let mut ids = FreshIds::new(&root);
        let mut snapshot = DomSnapshot::default();
        let mut stack = vec![(SnapshotNode::Element(root), None)];

        while let Some((node, parent)) = stack.pop() {
            match node {
                SnapshotNode::Text { text } => {
                    if let Some(parent) = parent {
                        snapshot.push_text_run(parent, text);
                    }
                }
                SnapshotNode::Element(element) => {
                    let id = match element.id.map(NodeId) {
                        Some(id) if !snapshot.index.contains_key(&id) => id,
                        _ => ids.fresh(&snapshot.index),
                    };
                    let SnapshotElement {
                        tag,
                        attrs,
                        display,
                        disabled,
                        children,
                        ..
                    } = element;
                    snapshot.push_element(id, parent, tag, attrs, display, disabled);
                    stack.extend(children.into_iter().rev().map(|child| (child, Some(id))));
                }
            }
        }
        snapshot
    }

    /// Load the flat format. Ids must be unique and every parent must appear
    /// before its children.
    pub fn from_flat(flat: FlatSnapshot) -> Result<Self, SnapshotError> {
        let mut snapshot = DomSnapshot::default();
        for entry in flat.nodes {
            match entry {
                FlatEntry::Element(element) => {
                    let id = NodeId(element.id);
                    if snapshot.index.contains_key(&id) {
                        return Err(SnapshotError::DuplicateId(element.id));
                    }
                    let parent = match element.parent {
                        Some(parent) if snapshot.index.contains_key(&NodeId(parent)) => {
                            Some(NodeId(parent))
                        }
                        Some(parent) => return Err(SnapshotError::UnknownParent(parent)),
                        None if snapshot.root.is_some() => {
                            return Err(SnapshotError::MultipleRoots(element.id));
                        }
                        None => None,
                    };
                    snapshot.push_element(
                        id,
                        parent,
                        element.tag,
                        element.attrs,
                        element.display,
                        element.disabled,
                    );
                }
                FlatEntry::Text { parent, text } => {
                    if !snapshot.index.contains_key(&NodeId(parent)) {
                        return Err(SnapshotError::UnknownParent(parent));
                    }
                    snapshot.push_text_run(NodeId(parent), text);
                }
            }
        }
        Ok(snapshot)
    }

    /// Parse the flat format written by the page script.
    pub fn from_flat_json_str(json: &str) -> Result<Self, SnapshotError> {
        let flat: FlatSnapshot = serde_json::from_str(json)?;
        Self::from_flat(flat)
    }

    /// Parse either format.
    pub fn from_json_str(json: &str) -> Result<Self, SnapshotError> {
        match serde_json::from_str::<FlatSnapshot>(json) {
            Ok(flat) => Self::from_flat(flat),
            Err(flat) => match serde_json::from_str::<SnapshotElement>(json) {
                Ok(root) => Ok(Self::from_root(root)),
                Err(nested) => Err(SnapshotError::Format { flat, nested }),
            },
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push_element(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        tag: String,
        attrs: BTreeMap<String, String>,
        display: Option<String>,
        disabled: bool,
    ) {
        let slot = self.nodes.len();
        self.nodes.push(NodeData {
            parent,
            tag: tag.to_ascii_lowercase(),
            attrs: attrs
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            display,
            disabled,
            children: Vec::new(),
            content: Vec::new(),
        });
        self.index.insert(id, slot);

        match parent.and_then(|parent| self.index.get(&parent).copied()) {
            Some(parent_slot) => {
                let parent = &mut self.nodes[parent_slot];
                parent.children.push(id);
                parent.content.push(Content::Element(id));
            }
            None => self.root = Some(id),
        }
    }

    fn push_text_run(&mut self, parent: NodeId, text: String) {
        if let Some(&slot) = self.index.get(&parent) {
            self.nodes[slot].content.push(Content::Text(text));
        }
    }

    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.index.get(&id).map(|slot| &self.nodes[*slot])
    }
}

/// Allocator for elements of a nested tree that lack a usable id.
struct FreshIds {
    next: u64,
    reserved: HashSet<u64>,
}

impl FreshIds {
    fn new(root: &SnapshotElement) -> Self {
        let mut reserved = HashSet::new();
        let mut stack = vec![root];
        while let Some(element) = stack.pop() {
            reserved.extend(element.id);
            stack.extend(element.children.iter().filter_map(|child| match child {
                SnapshotNode::Element(inner) => Some(inner),
                SnapshotNode::Text { .. } => None,
            }));
        }
        let next = reserved
            .iter()
            .max()
            .map_or(1, |max| max.wrapping_add(1));
        Self { next, reserved }
    }

    // Terminates: the tree holds far fewer than 2^64 ids.
    fn fresh(&mut self, assigned: &HashMap<NodeId, usize>) -> NodeId {
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if !self.reserved.contains(&candidate) && !assigned.contains_key(&NodeId(candidate)) {
                return NodeId(candidate);
            }
        }
    }
}

impl ObservedTree for DomSnapshot {
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node)
            .map(|data| data.children.as_slice())
            .unwrap_or(&[])
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|data| data.parent)
    }

    fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.node(node).map(|data| data.tag.as_str())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        let data = self.node(node)?;
        data.attrs
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn computed_display(&self, node: NodeId) -> Option<&str> {
        self.node(node).and_then(|data| data.display.as_deref())
    }

    fn is_disabled(&self, node: NodeId) -> bool {
        self.node(node).map(|data| data.disabled).unwrap_or(false)
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        let Some(data) = self.node(node) else {
            return out;
        };
        let mut stack = vec![data.content.iter()];
        while let Some(runs) = stack.last_mut() {
            match runs.next() {
                Some(Content::Text(text)) => out.push_str(text),
                Some(Content::Element(child)) => {
                    if let Some(child) = self.node(*child) {
                        stack.push(child.content.iter());
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
        out
    }
}
