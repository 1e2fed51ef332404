//! swarmgrid-monitor: the metric polls of the control loop.
//!
//! Each poll samples its targets, evaluates the applicable rules, records
//! the outcome in the debouncer and actuates decisions that became
//! actionable. Host and service polls run on independent timers.

pub mod monitor;

pub use monitor::{Actuation, Evaluation, Monitor, Poll};
