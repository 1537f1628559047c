//! Command-path observability: slow log and latency monitor.
//!
//! Both sinks are fed by the gateway around every dispatch. Recording is
//! O(1), holds no lock across anything slow, and can never fail the
//! underlying command.

pub mod latency;
pub mod slowlog;

pub use latency::*;
pub use slowlog::*;
