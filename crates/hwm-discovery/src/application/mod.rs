//! # Application Module
//!
//! The discovery service: intake, evaluation, the policy gate and
//! reconciliation, orchestrated over the state actor and outbound ports.

mod evaluate;
mod intake;
mod policy_gate;
pub mod reconcile;
pub mod service;

#[cfg(test)]
mod tests;

pub use reconcile::{ReconciliationLoop, SweepReport};
pub use service::DiscoveryService;
