//! Connection supervisor for aura.
//!
//! The relay keeps one duplex channel open to the local editing client,
//! decodes its `replace-range` commands and hands them, one at a time, to the
//! agent living in whichever execution context is focused. Every command is
//! answered exactly once under its request id.

pub mod config;
pub mod host;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

pub use config::{ENDPOINT, RelayConfig};
pub use supervisor::{Supervisor, SupervisorHandle};
