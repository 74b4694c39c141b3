//! Monitoring engine module - the probes and the loop that drives them
//!
//! This module is responsible for:
//! - Measuring router reachability and internet throughput
//! - Validating probe settings
//! - Scheduling check cycles

pub mod checker;
pub mod ping;
pub mod router;
pub mod scheduler;
pub mod speed;
pub mod types;
pub mod validation;

pub use checker::Probe;
pub use scheduler::Scheduler;
