//! Units of work and the workers that perform them
//!
//! - [`Task`] - Payload for one unit of work (or a sentinel)
//! - [`WorkResult`] - What one invocation reported
//! - [`Worker`] / [`WorkHandler`] - The work function and its status cell

mod result;
mod task;
mod worker;

pub use result::WorkResult;
pub use task::{Task, TaskItem};
pub use worker::{WorkError, WorkFn, WorkHandler, Worker};
