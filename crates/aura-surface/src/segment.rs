//! Flattened view of a structured editable region.
//!
//! Every text node under the root contributes one segment, in document
//! order. Segments are contiguous and cover the flattened text exactly once.
//! A map is built fresh for each command and never cached, because the page
//! may change between commands.

use crate::document::{Document, NodeId, Position};
use crate::text::unit_len;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub node: NodeId,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    segments: Vec<Segment>,
    text: String,
    len: usize,
}

impl SegmentMap {
    pub fn build(document: &Document, root: NodeId) -> Self {
        let mut map = SegmentMap::default();
        for node in document.preorder(root) {
            let Some(text) = document.text(node) else {
                continue;
            };
            let start = map.len;
            map.len += unit_len(text);
            map.text.push_str(text);
            map.segments.push(Segment {
                node,
                start,
                end: map.len,
            });
        }
        map
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Flattened length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First segment whose inclusive bounds contain `offset`. An offset on a
    /// boundary belongs to the earlier segment.
    pub fn segment_containing(&self, offset: usize) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.contains(offset))
    }

    /// Node-local position for a flattened offset.
    pub fn position_of(&self, offset: usize) -> Option<Position> {
        self.segment_containing(offset)
            .map(|segment| Position::new(segment.node, offset - segment.start))
    }

    /// Flattened offset for a node-local position inside a mapped text node.
    pub fn offset_of(&self, node: NodeId, local: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|segment| segment.node == node)
            .map(|segment| segment.start + local.min(segment.len()))
    }
}
