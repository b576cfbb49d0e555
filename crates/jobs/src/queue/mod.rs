//! Task sources for queue-backed workers
//!
//! This module provides:
//! - [`Queue`] - Pull-style source with acknowledgement
//! - [`InMemoryQueue`] - FIFO implementation for tests and local runs

mod memory;
mod source;

pub use memory::InMemoryQueue;
pub use source::{Queue, QueueError};
