//! Domain types and ports: payment snapshots, polling policy, the reconciliation
//! state machine, and the traits the outer layers implement.

pub mod payment;
pub mod policy;
pub mod ports;
pub mod reconciliation;
