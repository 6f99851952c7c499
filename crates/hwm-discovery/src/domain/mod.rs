//! # Domain Module
//!
//! Core types of the discovery engine.

pub mod entities;
pub mod errors;
pub mod events;
pub mod invariants;
pub mod policy;
pub mod registry;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use events::*;
pub use invariants::*;
pub use policy::*;
pub use registry::*;
pub use value_objects::*;
