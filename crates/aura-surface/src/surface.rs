//! The two kinds of editable surface and the capability they share.
//!
//! A surface borrows the document for the duration of one command. Which
//! kind it is gets decided once, from the focused element; after that the
//! engine only talks to the [`EditableSurface`] contract.

use std::ops::Range;

use aura_proto::ReplaceMethod;
use tracing::debug;

use crate::document::{
    Document, DomRange, EventKind, NodeId, NodeKind, Position, PrimitiveError, TextControl,
    INSERT_REPLACEMENT_TEXT,
};
use crate::engine::EngineError;
use crate::segment::SegmentMap;
use crate::text::{splice, unit_len};

/// Flat fields try the undo-preserving range primitive before overwriting.
const FLAT_STRATEGIES: [ReplaceMethod; 2] =
    [ReplaceMethod::SetRangeText, ReplaceMethod::ValueOverwrite];

/// Structured regions prefer the formatting-aware host insert.
const STRUCTURED_STRATEGIES: [ReplaceMethod; 2] =
    [ReplaceMethod::InsertText, ReplaceMethod::RangeInsert];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Flat,
    Structured,
}

pub trait EditableSurface {
    fn read_text(&self) -> String;

    /// Selection as flattened offsets, if there is one.
    fn current_selection(&self) -> Option<Range<usize>>;

    /// Replaces `range` with `replacement`, leaving the caret after the new
    /// text. Returns the primitive that performed the edit.
    fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<ReplaceMethod, EngineError>;

    /// Fires the notifications an observer would see after a user edit.
    fn notify(&self, replacement: &str);
}

enum Attempt {
    Applied,
    Unavailable,
}

pub struct FlatSurface<'a> {
    document: &'a mut Document,
    control: NodeId,
}

impl FlatSurface<'_> {
    pub fn node(&self) -> NodeId {
        self.control
    }

    fn field(&self) -> Option<&TextControl> {
        self.document.control(self.control)
    }

    fn field_mut(&mut self) -> Result<&mut TextControl, EngineError> {
        self.document
            .control_mut(self.control)
            .ok_or_else(|| EngineError::Fault("focused field is no longer a text control".into()))
    }

    fn attempt(
        &mut self,
        method: ReplaceMethod,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<Attempt, EngineError> {
        let field = self.field_mut()?;
        match method {
            ReplaceMethod::SetRangeText => {
                field.set_selection_range(range.start, range.end);
                match field.set_range_text(replacement, range.start, range.end) {
                    Ok(()) => Ok(Attempt::Applied),
                    Err(PrimitiveError::NotSupported) => Ok(Attempt::Unavailable),
                    Err(err) => Err(err.into()),
                }
            }
            ReplaceMethod::ValueOverwrite => {
                if range.start > range.end {
                    return Err(PrimitiveError::IndexSize {
                        start: range.start,
                        end: range.end,
                    }
                    .into());
                }
                let caret = range.start.min(unit_len(field.value())) + unit_len(replacement);
                let updated = splice(field.value(), range.start, range.end, replacement);
                field.set_value(updated);
                field.set_selection_range(caret, caret);
                Ok(Attempt::Applied)
            }
            ReplaceMethod::InsertText | ReplaceMethod::RangeInsert => Ok(Attempt::Unavailable),
        }
    }
}

impl EditableSurface for FlatSurface<'_> {
    fn read_text(&self) -> String {
        self.field()
            .map(|field| field.value().to_string())
            .unwrap_or_default()
    }

    fn current_selection(&self) -> Option<Range<usize>> {
        self.field().map(|field| {
            let (start, end) = field.selection();
            start..end
        })
    }

    fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<ReplaceMethod, EngineError> {
        for method in FLAT_STRATEGIES {
            match self.attempt(method, range.clone(), replacement)? {
                Attempt::Applied => return Ok(method),
                Attempt::Unavailable => debug!(
                    target = "aura_surface::surface",
                    method = method.as_str(),
                    "flat strategy unavailable"
                ),
            }
        }
        Err(EngineError::NoStrategy)
    }

    fn notify(&self, replacement: &str) {
        self.document.dispatch(
            self.control,
            EventKind::Input {
                input_type: INSERT_REPLACEMENT_TEXT,
                data: replacement.to_string(),
            },
        );
        self.document.dispatch(self.control, EventKind::Change);
    }
}

pub struct StructuredSurface<'a> {
    document: &'a mut Document,
    root: NodeId,
}

impl StructuredSurface<'_> {
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Flattened offset of a DOM position under the root.
    fn flat_offset(&self, map: &SegmentMap, at: Position) -> Option<usize> {
        match self.document.kind(at.node) {
            NodeKind::Text(_) => map.offset_of(at.node, at.offset),
            NodeKind::Element { .. } => {
                // Sum the text that precedes the boundary in document order.
                let boundary = self.document.children(at.node).get(at.offset).copied();
                let last_inside = self.document.preorder(at.node).last().copied();
                let mut total = 0;
                for node in self.document.preorder(self.root) {
                    if Some(node) == boundary {
                        return Some(total);
                    }
                    if let Some(text) = self.document.text(node) {
                        total += unit_len(text);
                    }
                    if boundary.is_none() && Some(node) == last_inside {
                        return Some(total);
                    }
                }
                None
            }
            NodeKind::Control(_) => None,
        }
    }

    fn attempt(
        &mut self,
        method: ReplaceMethod,
        range: DomRange,
        replacement: &str,
    ) -> Result<Attempt, EngineError> {
        match method {
            ReplaceMethod::InsertText => {
                if self.document.insert_text(range, replacement)? {
                    Ok(Attempt::Applied)
                } else {
                    Ok(Attempt::Unavailable)
                }
            }
            ReplaceMethod::RangeInsert => {
                let at = self.document.delete_contents(range)?;
                let node = self
                    .document
                    .insert_node(at, NodeKind::Text(replacement.to_string()))?;
                self.document.collapse_after(node)?;
                Ok(Attempt::Applied)
            }
            ReplaceMethod::SetRangeText | ReplaceMethod::ValueOverwrite => {
                Ok(Attempt::Unavailable)
            }
        }
    }
}

impl EditableSurface for StructuredSurface<'_> {
    fn read_text(&self) -> String {
        SegmentMap::build(self.document, self.root).text().to_string()
    }

    fn current_selection(&self) -> Option<Range<usize>> {
        let selection = self.document.selection()?;
        let map = SegmentMap::build(self.document, self.root);
        let start = self.flat_offset(&map, selection.start)?;
        let end = self.flat_offset(&map, selection.end)?;
        Some(start..end)
    }

    fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<ReplaceMethod, EngineError> {
        let map = SegmentMap::build(self.document, self.root);
        let start = map
            .position_of(range.start)
            .ok_or(EngineError::DomMapFailed {
                offset: range.start,
            })?;
        let end = map
            .position_of(range.end)
            .ok_or(EngineError::DomMapFailed { offset: range.end })?;
        let node_range = DomRange::new(start, end);
        self.document.set_selection(node_range);

        for method in STRUCTURED_STRATEGIES {
            match self.attempt(method, node_range, replacement)? {
                Attempt::Applied => return Ok(method),
                Attempt::Unavailable => debug!(
                    target = "aura_surface::surface",
                    method = method.as_str(),
                    "structured strategy unavailable"
                ),
            }
        }
        Err(EngineError::NoStrategy)
    }

    fn notify(&self, replacement: &str) {
        self.document.dispatch(
            self.root,
            EventKind::Input {
                input_type: INSERT_REPLACEMENT_TEXT,
                data: replacement.to_string(),
            },
        );
    }
}

/// The closed set of surfaces the engine can edit.
pub enum Surface<'a> {
    Flat(FlatSurface<'a>),
    Structured(StructuredSurface<'a>),
}

impl<'a> Surface<'a> {
    /// Classifies the focused element. Writable text controls are flat;
    /// anything else needs a `contenteditable` ancestor.
    pub fn acquire(document: &'a mut Document) -> Result<Self, EngineError> {
        let active = document
            .active_element()
            .ok_or(EngineError::NoActiveEditable)?;
        if document
            .control(active)
            .is_some_and(TextControl::is_writable)
        {
            return Ok(Surface::Flat(FlatSurface {
                document,
                control: active,
            }));
        }
        let root = document
            .closest_editable(active)
            .ok_or(EngineError::NoContentEditable)?;
        Ok(Surface::Structured(StructuredSurface { document, root }))
    }

    pub fn kind(&self) -> SurfaceKind {
        match self {
            Surface::Flat(_) => SurfaceKind::Flat,
            Surface::Structured(_) => SurfaceKind::Structured,
        }
    }
}

impl EditableSurface for Surface<'_> {
    fn read_text(&self) -> String {
        match self {
            Surface::Flat(surface) => surface.read_text(),
            Surface::Structured(surface) => surface.read_text(),
        }
    }

    fn current_selection(&self) -> Option<Range<usize>> {
        match self {
            Surface::Flat(surface) => surface.current_selection(),
            Surface::Structured(surface) => surface.current_selection(),
        }
    }

    fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: &str,
    ) -> Result<ReplaceMethod, EngineError> {
        match self {
            Surface::Flat(surface) => surface.replace_range(range, replacement),
            Surface::Structured(surface) => surface.replace_range(range, replacement),
        }
    }

    fn notify(&self, replacement: &str) {
        match self {
            Surface::Flat(surface) => surface.notify(replacement),
            Surface::Structured(surface) => surface.notify(replacement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_controls_are_flat() {
        let mut doc = Document::new();
        let root = doc.root();
        let field = doc.append_control(root, TextControl::input("abc"));
        doc.focus(field);
        let surface = Surface::acquire(&mut doc).unwrap();
        assert_eq!(surface.kind(), SurfaceKind::Flat);
        assert_eq!(surface.read_text(), "abc");
        assert_eq!(surface.current_selection(), Some(3..3));
    }

    #[test]
    fn read_only_input_inside_editable_is_structured() {
        let mut doc = Document::new();
        let root = doc.root();
        let editor = doc.append_editable(root, "div");
        doc.append_text(editor, "rich");
        let field = doc.append_control(editor, TextControl::input("locked").read_only());
        doc.focus(field);
        let surface = Surface::acquire(&mut doc).unwrap();
        assert_eq!(surface.kind(), SurfaceKind::Structured);
        assert_eq!(surface.read_text(), "rich");
    }

    #[test]
    fn acquisition_failures() {
        let mut doc = Document::new();
        assert_eq!(
            Surface::acquire(&mut doc).err(),
            Some(EngineError::NoActiveEditable)
        );
        let root = doc.root();
        let plain = doc.append_element(root, "p");
        doc.focus(plain);
        assert_eq!(
            Surface::acquire(&mut doc).err(),
            Some(EngineError::NoContentEditable)
        );
    }

    #[test]
    fn structured_selection_maps_to_flat_offsets() {
        let mut doc = Document::new();
        let root = doc.root();
        let editor = doc.append_editable(root, "div");
        let a = doc.append_text(editor, "AB");
        let b = doc.append_text(editor, "CD");
        doc.focus(editor);

        doc.set_selection(DomRange::new(Position::new(a, 1), Position::new(b, 1)));
        let surface = Surface::acquire(&mut doc).unwrap();
        assert_eq!(surface.current_selection(), Some(1..3));

        doc.set_selection(DomRange::caret(Position::new(editor, 1)));
        let surface = Surface::acquire(&mut doc).unwrap();
        assert_eq!(surface.current_selection(), Some(2..2));

        doc.set_selection(DomRange::caret(Position::new(editor, 2)));
        let surface = Surface::acquire(&mut doc).unwrap();
        assert_eq!(surface.current_selection(), Some(4..4));
    }

    #[test]
    fn flat_fallback_overwrites_value() {
        let mut doc = Document::new();
        let root = doc.root();
        let field = doc.append_control(root, TextControl::input("a@b.c").without_range_text());
        doc.focus(field);
        let mut surface = Surface::acquire(&mut doc).unwrap();
        let method = surface.replace_range(2..3, "example").unwrap();
        assert_eq!(method, ReplaceMethod::ValueOverwrite);
        assert_eq!(surface.read_text(), "a@example.c");
        assert_eq!(surface.current_selection(), Some(9..9));
    }
}
