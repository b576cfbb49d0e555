//! Reliability patterns for worker execution
//!
//! This module provides:
//! - [`Backoffs`] - Ascending retry-delay schedule with a saturating cursor
//! - [`WorkPolicy`] - Gates checked before each work call ([`RunLimit`], [`ErrorRatio`])

mod backoff;
mod policy;

pub use backoff::{Backoffs, DEFAULT_BACKOFF_SECONDS};
pub use policy::{ErrorRatio, PolicyDecision, RunLimit, WorkPolicy};
