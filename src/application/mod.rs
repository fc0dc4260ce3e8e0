//! Application layer: runs the reconciliation state machine against real time
//! and a real gateway.
//!
//! `ReconciliationEngine` drives one transaction on a single ticker inside a
//! spawned Tokio task; `SessionController` owns the engine of the transaction
//! currently shown and guarantees it is started once and disposed once.

pub mod engine;
pub mod session;
