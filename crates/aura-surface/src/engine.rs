//! Range resolution and atomic replace.
//!
//! One command goes through five steps against whatever surface is focused:
//! acquire the surface, check the optional fingerprint, validate (and if
//! needed relocate) the range, apply through the first strategy that is
//! available, then notify observers. Every failure becomes a structured
//! [`ReplaceResult`]; nothing escapes as a panic or a bare error.
//!
//! The fingerprint check is advisory. No lock is held between the check and
//! the write, so range validation is the real guard against stale edits.

use std::ops::Range;

use aura_proto::{Command, ErrorKind, ReplaceMethod, ReplaceResult};
use thiserror::Error;
use tracing::debug;

use crate::document::{Document, PrimitiveError};
use crate::fingerprint::Fingerprint;
use crate::surface::{EditableSurface, Surface, SurfaceKind};
use crate::text::{find_units, normalize_whitespace, unit_len, unit_slice};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no element is focused")]
    NoActiveEditable,
    #[error("focused element is neither a text field nor inside a contenteditable region")]
    NoContentEditable,
    #[error("document changed since the edit was planned (current hash {actual}, client sent {expected})")]
    DocumentModified { expected: u32, actual: u32 },
    #[error("expected {expected:?} at {start}..{end} but found {actual:?}")]
    RangeMismatch {
        expected: String,
        actual: String,
        start: usize,
        end: usize,
    },
    #[error("offset {offset} does not fall inside any text node")]
    DomMapFailed { offset: usize },
    #[error("no replace strategy could apply the edit")]
    NoStrategy,
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
    #[error("{0}")]
    Fault(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NoActiveEditable => ErrorKind::NoActiveEditable,
            EngineError::NoContentEditable => ErrorKind::NoContentEditable,
            EngineError::DocumentModified { .. } => ErrorKind::DocumentModified,
            EngineError::RangeMismatch { .. } => ErrorKind::RangeMismatch,
            EngineError::DomMapFailed { .. } => ErrorKind::DomMapFailed,
            EngineError::NoStrategy | EngineError::Primitive(_) | EngineError::Fault(_) => {
                ErrorKind::Exception
            }
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            EngineError::NoActiveEditable | EngineError::NoContentEditable => None,
            other => Some(other.to_string()),
        }
    }
}

/// Where an edit will land after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub start: usize,
    pub end: usize,
    /// True when drift recovery moved the range.
    pub relocated: bool,
}

impl Resolution {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Validates `[start, end)` against `expected`, relocating to the first
/// literal occurrence of `expected` when the text there no longer matches.
///
/// The comparison collapses whitespace runs, so text that only differs in
/// layout is accepted in place. That tolerance can also accept a range whose
/// content differs from the client's snapshot in whitespace only.
pub fn resolve_range(
    text: &str,
    start: usize,
    end: usize,
    expected: Option<&str>,
) -> Result<Resolution, EngineError> {
    let in_place = Resolution {
        start,
        end,
        relocated: false,
    };
    let Some(expected) = expected.filter(|expected| !expected.is_empty()) else {
        return Ok(in_place);
    };
    let actual = unit_slice(text, start, end);
    if normalize_whitespace(actual) == normalize_whitespace(expected) {
        return Ok(in_place);
    }
    match find_units(text, expected) {
        Some(found) => Ok(Resolution {
            start: found,
            end: found + unit_len(expected),
            relocated: true,
        }),
        None => Err(EngineError::RangeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
            start,
            end,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub surface: SurfaceKind,
    pub method: ReplaceMethod,
    pub resolution: Resolution,
    pub new_length: usize,
}

impl Applied {
    pub fn replaced_length(&self) -> usize {
        self.resolution.end.saturating_sub(self.resolution.start)
    }
}

/// Applies `command` to the focused surface of `document` and reports the
/// outcome under the command's request id.
pub fn apply_replace(document: &mut Document, command: &Command) -> ReplaceResult {
    match try_apply(document, command) {
        Ok(applied) => {
            debug!(
                target = "aura_surface::engine",
                request_id = %command.request_id,
                surface = ?applied.surface,
                method = applied.method.as_str(),
                relocated = applied.resolution.relocated,
                "replace applied"
            );
            ReplaceResult::applied(
                command.request_id.clone(),
                applied.method,
                applied.replaced_length(),
                applied.new_length,
            )
        }
        Err(err) => {
            debug!(
                target = "aura_surface::engine",
                request_id = %command.request_id,
                error = %err,
                "replace rejected"
            );
            let result = ReplaceResult::failed(command.request_id.clone(), err.kind());
            match err.details() {
                Some(details) => result.with_details(details),
                None => result,
            }
        }
    }
}

pub fn try_apply(document: &mut Document, command: &Command) -> Result<Applied, EngineError> {
    let mut surface = Surface::acquire(document)?;
    let text = surface.read_text();

    if let Some(client_hash) = command.document_hash {
        let current = Fingerprint::of(&text);
        if !current.matches_hash(client_hash) {
            return Err(EngineError::DocumentModified {
                expected: client_hash as u32,
                actual: current.hash,
            });
        }
    }

    let resolution = resolve_range(
        &text,
        command.start,
        command.end,
        command.expected_original.as_deref(),
    )?;
    let method = surface.replace_range(resolution.range(), &command.new_text)?;
    surface.notify(&command.new_text);

    Ok(Applied {
        surface: surface.kind(),
        method,
        resolution,
        new_length: unit_len(&command.new_text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_text_is_never_relocated() {
        let resolution = resolve_range("hello world", 6, 11, Some("world")).unwrap();
        assert_eq!(
            resolution,
            Resolution {
                start: 6,
                end: 11,
                relocated: false
            }
        );
    }

    #[test]
    fn missing_expectation_skips_validation() {
        assert_eq!(resolve_range("abc", 1, 2, None).unwrap().range(), 1..2);
        assert_eq!(resolve_range("abc", 1, 2, Some("")).unwrap().range(), 1..2);
    }

    #[test]
    fn whitespace_drift_is_tolerated_in_place() {
        let text = "alpha  beta\n gamma";
        let resolution = resolve_range(text, 0, 11, Some("alpha beta")).unwrap();
        assert!(!resolution.relocated);
        assert_eq!(resolution.range(), 0..11);
    }

    #[test]
    fn drifted_range_relocates_to_first_occurrence() {
        let text = "inserted prefix: hello world";
        let resolution = resolve_range(text, 6, 11, Some("world")).unwrap();
        assert!(resolution.relocated);
        assert_eq!(resolution.range(), 23..28);
    }

    #[test]
    fn relocation_ignores_drift_distance() {
        let text = format!("{}needle{}", "x".repeat(500), "y".repeat(500));
        for (start, end) in [(0, 6), (250, 256), (990, 996), (5000, 5006)] {
            let resolution = resolve_range(&text, start, end, Some("needle")).unwrap();
            assert_eq!(resolution.range(), 500..506);
        }
    }

    #[test]
    fn absent_expectation_is_a_mismatch() {
        let err = resolve_range("hello world", 0, 5, Some("foo")).unwrap_err();
        assert_eq!(
            err,
            EngineError::RangeMismatch {
                expected: "foo".into(),
                actual: "hello".into(),
                start: 0,
                end: 5
            }
        );
        assert_eq!(err.kind(), ErrorKind::RangeMismatch);
        assert_eq!(
            err.details().as_deref(),
            Some("expected \"foo\" at 0..5 but found \"hello\"")
        );
    }

    #[test]
    fn error_kinds_cover_every_variant() {
        assert_eq!(EngineError::NoActiveEditable.kind(), ErrorKind::NoActiveEditable);
        assert_eq!(EngineError::NoContentEditable.kind(), ErrorKind::NoContentEditable);
        assert_eq!(
            EngineError::DocumentModified { expected: 1, actual: 2 }.kind(),
            ErrorKind::DocumentModified
        );
        assert_eq!(EngineError::DomMapFailed { offset: 9 }.kind(), ErrorKind::DomMapFailed);
        assert_eq!(EngineError::NoStrategy.kind(), ErrorKind::Exception);
        assert_eq!(
            EngineError::Primitive(PrimitiveError::InvertedRange).kind(),
            ErrorKind::Exception
        );
        assert_eq!(EngineError::NoActiveEditable.details(), None);
    }
}
