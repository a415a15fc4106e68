//! In-memory page model standing in for the host's document.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Removed nodes stay
//! in the arena detached from the tree, so ids handed out earlier never
//! dangle. Positions follow the usual DOM convention: inside a text node the
//! offset counts UTF-16 code units, inside an element it counts children.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::text::{splice, unit_len, unit_slice};

const EVENT_CAPACITY: usize = 64;

/// Input type reported on the `input` notification for replacements.
pub const INSERT_REPLACEMENT_TEXT: &str = "insertReplacementText";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String, content_editable: bool },
    Text(String),
    Control(TextControl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Input,
    TextArea,
}

/// A single-buffer text field (`input` / `textarea`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextControl {
    kind: ControlKind,
    value: String,
    read_only: bool,
    range_text: bool,
    selection: (usize, usize),
    undo: Vec<String>,
}

impl TextControl {
    pub fn input(value: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::Input, value.into())
    }

    pub fn textarea(value: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::TextArea, value.into())
    }

    fn with_kind(kind: ControlKind, value: String) -> Self {
        let len = unit_len(&value);
        Self {
            kind,
            value,
            read_only: false,
            range_text: true,
            selection: (len, len),
            undo: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Models field types (email, number, ...) that reject range replacement.
    pub fn without_range_text(mut self) -> Self {
        self.range_text = false;
        self
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn selection(&self) -> (usize, usize) {
        self.selection
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn supports_range_text(&self) -> bool {
        self.range_text
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Text areas are always editable through their value; read-only inputs
    /// are not.
    pub fn is_writable(&self) -> bool {
        self.kind == ControlKind::TextArea || !self.read_only
    }

    pub fn set_selection_range(&mut self, start: usize, end: usize) {
        let len = unit_len(&self.value);
        let end = end.min(len);
        self.selection = (start.min(end), end);
    }

    /// Replaces `[start, end)` in place and leaves the caret after the new
    /// text. The previous value is kept on the undo stack.
    pub fn set_range_text(
        &mut self,
        replacement: &str,
        start: usize,
        end: usize,
    ) -> Result<(), PrimitiveError> {
        if !self.range_text {
            return Err(PrimitiveError::NotSupported);
        }
        if start > end {
            return Err(PrimitiveError::IndexSize { start, end });
        }
        let len = unit_len(&self.value);
        let (start, end) = (start.min(len), end.min(len));
        let updated = splice(&self.value, start, end, replacement);
        self.undo.push(std::mem::replace(&mut self.value, updated));
        let caret = start + unit_len(replacement);
        self.selection = (caret, caret);
        Ok(())
    }

    /// Programmatic value assignment. Like a host field, this drops the undo
    /// history and parks the caret at the end.
    pub fn set_value(&mut self, value: String) {
        let len = unit_len(&value);
        self.value = value;
        self.undo.clear();
        self.selection = (len, len);
    }

    pub fn undo(&mut self) -> bool {
        match self.undo.pop() {
            Some(previous) => {
                let len = unit_len(&previous);
                self.value = previous;
                self.selection = (len, len);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    pub offset: usize,
}

impl Position {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomRange {
    pub start: Position,
    pub end: Position,
}

impl DomRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn caret(at: Position) -> Self {
        Self { start: at, end: at }
    }
}

/// The document selection; a collapsed range is a caret.
pub type Selection = DomRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceEvent {
    pub target: NodeId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Input { input_type: &'static str, data: String },
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimitiveError {
    #[error("the operation is not supported by this element")]
    NotSupported,
    #[error("index size error: start {start} is greater than end {end}")]
    IndexSize { start: usize, end: usize },
    #[error("range end precedes range start")]
    InvertedRange,
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("node {0:?} is not attached to the document")]
    Detached(NodeId),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    active: Option<NodeId>,
    selection: Option<Selection>,
    insert_text: bool,
    events: broadcast::Sender<SurfaceEvent>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty page with a non-editable `body` root.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut document = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            active: None,
            selection: None,
            insert_text: true,
            events,
        };
        document.root = document.push_node(
            NodeKind::Element {
                tag: "body".to_string(),
                content_editable: false,
            },
            None,
        );
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.append(
            parent,
            NodeKind::Element {
                tag: tag.to_string(),
                content_editable: false,
            },
        )
    }

    /// Appends an element carrying the `contenteditable` marker.
    pub fn append_editable(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.append(
            parent,
            NodeKind::Element {
                tag: tag.to_string(),
                content_editable: true,
            },
        )
    }

    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.append(parent, NodeKind::Text(text.into()))
    }

    pub fn append_control(&mut self, parent: NodeId, control: TextControl) -> NodeId {
        self.append(parent, NodeKind::Control(control))
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.push_node(kind, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    fn push_node(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn control(&self, node: NodeId) -> Option<&TextControl> {
        match &self.nodes[node.0].kind {
            NodeKind::Control(control) => Some(control),
            _ => None,
        }
    }

    pub fn control_mut(&mut self, node: NodeId) -> Option<&mut TextControl> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Control(control) => Some(control),
            _ => None,
        }
    }

    pub fn set_content_editable(&mut self, node: NodeId, editable: bool) {
        if let NodeKind::Element {
            content_editable, ..
        } = &mut self.nodes[node.0].kind
        {
            *content_editable = editable;
        }
    }

    pub fn focus(&mut self, node: NodeId) {
        self.active = Some(node);
    }

    pub fn blur(&mut self) {
        self.active = None;
    }

    /// The focused node, if it is still part of the tree.
    pub fn active_element(&self) -> Option<NodeId> {
        self.active.filter(|node| self.is_attached(*node))
    }

    /// Nearest inclusive ancestor carrying the `contenteditable` marker.
    pub fn closest_editable(&self, node: NodeId) -> Option<NodeId> {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if let NodeKind::Element {
                content_editable: true,
                ..
            } = self.kind(current)
            {
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }

    /// `root` followed by its descendants in document order.
    pub fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        order
    }

    /// Concatenated text of every text node under `root`.
    pub fn text_content(&self, root: NodeId) -> String {
        self.preorder(root)
            .into_iter()
            .filter_map(|node| self.text(node))
            .collect()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = Some(selection);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn set_insert_text_supported(&mut self, supported: bool) {
        self.insert_text = supported;
    }

    pub fn insert_text_supported(&self) -> bool {
        self.insert_text
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    /// Fires a notification. Having no listeners is not an error.
    pub fn dispatch(&self, target: NodeId, kind: EventKind) {
        let _ = self.events.send(SurfaceEvent { target, kind });
    }

    fn index_in_parent(&self, node: NodeId) -> Result<(NodeId, usize), PrimitiveError> {
        let parent = self.parent(node).ok_or(PrimitiveError::Detached(node))?;
        let index = self
            .children(parent)
            .iter()
            .position(|child| *child == node)
            .ok_or(PrimitiveError::Detached(node))?;
        Ok((parent, index))
    }

    fn insert_child(&mut self, parent: NodeId, index: usize, kind: NodeKind) -> NodeId {
        let id = self.push_node(kind, Some(parent));
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, id);
        id
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != node);
        }
    }

    fn set_text(&mut self, node: NodeId, text: String) -> Result<(), PrimitiveError> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Text(current) => {
                *current = text;
                Ok(())
            }
            _ => Err(PrimitiveError::NotText(node)),
        }
    }

    fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.parent(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Removes everything between two text positions. Nodes wholly inside
    /// the range are detached; the boundary text nodes are trimmed. Returns
    /// the collapsed position where the range used to start.
    pub fn delete_contents(&mut self, range: DomRange) -> Result<Position, PrimitiveError> {
        let DomRange { start, end } = range;
        let start_text = self
            .text(start.node)
            .ok_or(PrimitiveError::NotText(start.node))?
            .to_string();
        let end_text = self
            .text(end.node)
            .ok_or(PrimitiveError::NotText(end.node))?
            .to_string();

        let order = self.preorder(self.root);
        let start_idx = order
            .iter()
            .position(|node| *node == start.node)
            .ok_or(PrimitiveError::Detached(start.node))?;
        let end_idx = order
            .iter()
            .position(|node| *node == end.node)
            .ok_or(PrimitiveError::Detached(end.node))?;

        let head_len = start.offset.min(unit_len(&start_text));
        if start_idx == end_idx {
            if start.offset > end.offset {
                return Err(PrimitiveError::InvertedRange);
            }
            self.set_text(start.node, splice(&start_text, start.offset, end.offset, ""))?;
            return Ok(Position::new(start.node, head_len));
        }
        if start_idx > end_idx {
            return Err(PrimitiveError::InvertedRange);
        }

        for node in order[start_idx + 1..end_idx].iter().copied() {
            if !self.is_ancestor_of(node, end.node) {
                self.detach(node);
            }
        }
        self.set_text(start.node, unit_slice(&start_text, 0, head_len).to_string())?;
        let end_len = unit_len(&end_text);
        self.set_text(
            end.node,
            unit_slice(&end_text, end.offset.min(end_len), end_len).to_string(),
        )?;
        Ok(Position::new(start.node, head_len))
    }

    /// Inserts a new node at `at`, splitting a text node when the position
    /// falls inside it.
    pub fn insert_node(&mut self, at: Position, kind: NodeKind) -> Result<NodeId, PrimitiveError> {
        match self.kind(at.node).clone() {
            NodeKind::Text(text) => {
                let (parent, index) = self.index_in_parent(at.node)?;
                let len = unit_len(&text);
                let offset = at.offset.min(len);
                if offset == 0 {
                    return Ok(self.insert_child(parent, index, kind));
                }
                if offset < len {
                    self.set_text(at.node, unit_slice(&text, 0, offset).to_string())?;
                    self.insert_child(
                        parent,
                        index + 1,
                        NodeKind::Text(unit_slice(&text, offset, len).to_string()),
                    );
                }
                Ok(self.insert_child(parent, index + 1, kind))
            }
            NodeKind::Element { .. } => Ok(self.insert_child(at.node, at.offset, kind)),
            NodeKind::Control(_) => Err(PrimitiveError::NotSupported),
        }
    }

    /// Host text insertion over `range`: the new text joins the text node the
    /// range starts in, keeping whatever formatting wraps it. Returns
    /// `Ok(false)` when the host does not offer the primitive.
    pub fn insert_text(&mut self, range: DomRange, text: &str) -> Result<bool, PrimitiveError> {
        if !self.insert_text {
            return Ok(false);
        }
        let at = self.delete_contents(range)?;
        let current = self
            .text(at.node)
            .ok_or(PrimitiveError::NotText(at.node))?
            .to_string();
        self.set_text(at.node, splice(&current, at.offset, at.offset, text))?;
        self.selection = Some(DomRange::caret(Position::new(
            at.node,
            at.offset + unit_len(text),
        )));
        Ok(true)
    }

    /// Collapses the selection to just after `node`.
    pub fn collapse_after(&mut self, node: NodeId) -> Result<(), PrimitiveError> {
        let (parent, index) = self.index_in_parent(node)?;
        self.selection = Some(DomRange::caret(Position::new(parent, index + 1)));
        Ok(())
    }
}
