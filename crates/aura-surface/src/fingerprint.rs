//! Cheap content signature used for optimistic staleness checks.
//!
//! The hash is a 32-bit `h * 31 + c` rolling hash. Collisions are expected
//! and tolerated: a matching fingerprint only means the edit is worth trying.

use std::time::Instant;

use crate::text::unit_len;

#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    pub length: usize,
    pub hash: u32,
    pub taken_at: Instant,
}

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        Self {
            length: unit_len(text),
            hash: rolling_hash(text),
            taken_at: Instant::now(),
        }
    }

    /// Compares against a client-supplied hash. Clients may send the value as
    /// a signed 32-bit integer, so only the low 32 bits are significant.
    pub fn matches_hash(&self, client_hash: i64) -> bool {
        self.hash == client_hash as u32
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.hash == other.hash
    }
}

impl Eq for Fingerprint {}

pub fn fingerprint(text: &str) -> Fingerprint {
    Fingerprint::of(text)
}

fn rolling_hash(text: &str) -> u32 {
    text.encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)))
}
