//! Bounded external operations
//!
//! The external application runs as a separate OS process under a hard
//! wall-clock deadline. A timed-out process is abandoned, never joined; the
//! [`ProcessReaper`] reclaims it later by name.

mod reaper;
mod runner;

pub use reaper::{NameReaper, ProcessReaper};
pub use runner::{BoundedOperation, ExternalApplication};
