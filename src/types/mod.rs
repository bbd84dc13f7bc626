//! Type definitions shared across the worker
//!
//! Task descriptors as dequeued from the work queue, their JSON payload, and
//! the resolved refresh target the executor works on.

mod task;

pub use task::*;
