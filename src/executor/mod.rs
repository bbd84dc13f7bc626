//! Task executor module
//!
//! Handles one task's lifecycle:
//! - Resolving the payload and a remote session
//! - Fetching the file into the work directory
//! - Refreshing it through the bounded external operation
//! - Publishing it back, plus the monthly archive copy

mod publish;
mod runner;
mod state;

pub use runner::*;
pub use state::*;
