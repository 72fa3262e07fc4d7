//! qsync: contention driver for FIFO-fair async synchronization primitives
//!
//! This library drives the primitives of the `fairsync` crate from many
//! concurrent tasks, with optional timeouts and cancellation, and reports how
//! the waits ended alongside the engine's contention counters.

pub mod cli;
pub mod driver;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use driver::{run_scenario, DriverStats, Outcome, Tally};
pub use error::{DriverError, Result};
pub use progress::ProgressTracker;
