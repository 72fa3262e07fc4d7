//! Command-line interface definitions

use anyhow::Result;
use clap::Parser;
use fairsync::Timeout;
use std::time::Duration;

/// Contention driver for FIFO-fair async synchronization primitives
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Primitive to drive
    #[arg(long, value_enum, default_value = "mutex")]
    pub scenario: Scenario,

    /// Number of concurrent worker tasks
    #[arg(long, default_value = "16")]
    pub tasks: usize,

    /// Waits issued by each worker task
    ///
    /// For the pipe scenario, `tasks * iterations` operations are added.
    #[arg(long, default_value = "100")]
    pub iterations: usize,

    /// Permits for the semaphore scenario
    #[arg(long, default_value = "4")]
    pub permits: usize,

    /// Per-wait timeout in milliseconds (-1 = infinite, 0 = never queue)
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    pub timeout_ms: i64,

    /// How long a worker holds an acquisition, in microseconds
    ///
    /// Also scales the staggered completion delays of pipe operations.
    #[arg(long, default_value = "50")]
    pub hold_us: u64,

    /// Cancel every outstanding wait after this many milliseconds
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,

    /// Tag each wait with its worker so queued callers can be inspected
    #[arg(long)]
    pub track_callers: bool,

    /// Runtime worker threads (0 = auto-detect)
    #[arg(long, default_value = "0")]
    pub worker_threads: usize,

    /// Show progress information
    #[arg(long)]
    pub progress: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Primitive exercised by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Exclusive lock: one holder at a time
    Mutex,
    /// Counting semaphore with mixed one- and two-permit requests
    Semaphore,
    /// Reader/writer lock, one writer for every three readers
    Rwlock,
    /// Manual-reset event toggled by a controller task
    Event,
    /// Completion pipe drained in completion order
    Pipe,
}

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Tasks or iterations are outside valid bounds
    /// - The semaphore scenario has no permits
    /// - The timeout is negative but not -1
    /// - Both --quiet and --verbose options are used
    pub fn validate(&self) -> Result<()> {
        if self.scenario == Scenario::Semaphore && self.permits == 0 {
            anyhow::bail!("Semaphore scenario needs at least one permit");
        }

        self.timeout()?;
        self.validate_common()
    }

    fn validate_common(&self) -> Result<()> {
        if self.tasks < 1 || self.tasks > 100_000 {
            anyhow::bail!("Tasks must be between 1 and 100000, got: {}", self.tasks);
        }

        if self.iterations < 1 || self.iterations > 1_000_000 {
            anyhow::bail!(
                "Iterations must be between 1 and 1000000, got: {}",
                self.iterations
            );
        }

        if self.effective_worker_threads() == 0 {
            anyhow::bail!("No CPU cores available");
        }

        // Validate conflicting options
        if self.quiet && self.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        Ok(())
    }

    /// Per-wait timeout
    ///
    /// # Errors
    ///
    /// Returns an error for negative values other than -1.
    pub fn timeout(&self) -> Result<Timeout> {
        Timeout::from_millis(self.timeout_ms)
            .map_err(|e| anyhow::anyhow!("Invalid --timeout-ms {}: {e}", self.timeout_ms))
    }

    /// Get the actual runtime worker count to use
    #[must_use]
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    #[must_use]
    pub const fn hold(&self) -> Duration {
        Duration::from_micros(self.hold_us)
    }

    /// Total waits (or pipe operations) in the run
    #[must_use]
    pub const fn total_waits(&self) -> usize {
        self.tasks.saturating_mul(self.iterations)
    }
}
