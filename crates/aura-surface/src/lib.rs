//! Editable surfaces and the engine that applies range edits to them.
//!
//! A [`Document`] stands in for the host page: an arena of elements, text
//! nodes and text controls with one active element. [`apply_replace`] resolves
//! a [`Command`](aura_proto::Command) against whatever surface is active and
//! performs the edit as a single visible mutation.

pub mod document;
pub mod engine;
pub mod fingerprint;
pub mod segment;
pub mod surface;
pub mod text;

pub use document::{
    ControlKind, Document, DomRange, EventKind, NodeId, NodeKind, Position, PrimitiveError,
    Selection, SurfaceEvent, TextControl,
};
pub use engine::{apply_replace, resolve_range, Applied, EngineError, Resolution};
pub use fingerprint::{fingerprint, Fingerprint};
pub use segment::{Segment, SegmentMap};
pub use surface::{EditableSurface, FlatSurface, StructuredSurface, Surface, SurfaceKind};
