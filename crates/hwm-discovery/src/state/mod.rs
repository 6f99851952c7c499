//! # Discovery State
//!
//! Detection cache and the actor that owns it.

pub mod actor;
pub mod cache;

pub use actor::{EvaluationLease, StateCommand, StateHandle};
pub use cache::{DetectionCache, EvictionPolicy};
