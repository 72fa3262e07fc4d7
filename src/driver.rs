//! Contention driver
//!
//! Runs worker tasks against one primitive and tallies how every wait ended.
//!
//! # Architecture
//!
//! A run follows these phases:
//! 1. **Setup**: build the primitive with shared counters and caller tracking
//! 2. **Contention**: `tasks` workers each issue `iterations` waits, holding
//!    every acquisition for `hold_us`
//! 3. **Cancellation**: optionally, a timer cancels all outstanding waits
//! 4. **Teardown**: dispose the primitive once every holder has released
//!
//! The pipe scenario instead adds `tasks * iterations` operations with
//! staggered completion delays and drains them in completion order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use clap::Parser;
//! use qsync::cli::Args;
//! use qsync::driver::run_scenario;
//!
//! #[tokio::main]
//! async fn main() -> qsync::Result<()> {
//!     let args = Args::parse();
//!     let stats = run_scenario(&args).await?;
//!     println!("{stats}");
//!     Ok(())
//! }
//! ```

use crate::cli::{Args, Scenario};
use crate::error::{DriverError, Result};
use crate::progress::ProgressTracker;
use fairsync::{
    AsyncExclusiveLock, AsyncManualResetEvent, AsyncReaderWriterLock, CallerTag,
    CancellationToken, CounterSnapshot, Semaphore, SyncCounters, SyncOptions, TaskCompletionPipe,
    Timeout, WaitError, WaitOptions,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a single wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acquired,
    TimedOut,
    Canceled,
}

impl Outcome {
    /// Classify a bool-shaped wait
    ///
    /// # Errors
    ///
    /// Any failure other than a timeout or cancellation.
    pub fn from_wait(result: fairsync::Result<bool>) -> Result<Self> {
        match result {
            Ok(true) => Ok(Self::Acquired),
            Ok(false) => Ok(Self::TimedOut),
            Err(error) => Self::from_error(error),
        }
    }

    /// Classify a failed wait
    ///
    /// # Errors
    ///
    /// Any failure other than a timeout or cancellation.
    pub fn from_error(error: WaitError) -> Result<Self> {
        match error {
            WaitError::TimedOut => Ok(Self::TimedOut),
            WaitError::Canceled => Ok(Self::Canceled),
            other => Err(other.into()),
        }
    }
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub acquired: u64,
    pub timed_out: u64,
    pub canceled: u64,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Acquired => self.acquired += 1,
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Canceled => self.canceled += 1,
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.acquired += other.acquired;
        self.timed_out += other.timed_out;
        self.canceled += other.canceled;
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.acquired + self.timed_out + self.canceled
    }
}

/// Statistics for a driver run
#[derive(Debug, Clone)]
pub struct DriverStats {
    /// Primitive that was driven
    pub scenario: Scenario,

    /// How the waits ended
    pub tally: Tally,

    /// Pipe outputs that arrived after an operation added later
    pub reordered: u64,

    /// Engine counters; `None` for the pipe scenario
    pub counters: Option<CounterSnapshot>,

    /// Total duration of the run
    pub duration: Duration,
}

impl fmt::Display for DriverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario:  {:?}", self.scenario)?;
        writeln!(f, "acquired:  {}", self.tally.acquired)?;
        writeln!(f, "timed out: {}", self.tally.timed_out)?;
        writeln!(f, "canceled:  {}", self.tally.canceled)?;
        if self.scenario == Scenario::Pipe {
            writeln!(f, "reordered: {}", self.reordered)?;
        }
        if let Some(counters) = &self.counters {
            writeln!(f, "contended: {}", counters.contention)?;
            writeln!(f, "mean wait: {:?}", counters.mean_wait())?;
            writeln!(f, "max wait:  {:?}", counters.max_wait)?;
        }
        write!(f, "duration:  {:?}", self.duration)
    }
}

/// Settings shared by every worker of a run
struct RunContext {
    timeout: Timeout,
    token: CancellationToken,
    track_callers: bool,
    hold: Duration,
    iterations: usize,
    progress: ProgressTracker,
}

impl RunContext {
    fn wait_options(&self, task: usize) -> WaitOptions {
        let options = WaitOptions::new()
            .timeout(self.timeout)
            .cancellation(self.token.clone());
        if self.track_callers {
            options.tag(format!("task-{task}"))
        } else {
            options
        }
    }

    async fn hold(&self) {
        if self.hold.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.hold).await;
        }
    }

    fn record(&self, tally: &mut Tally, outcome: Outcome) {
        tally.record(outcome);
        self.progress.update();
    }

    /// Hold a granted acquisition, then release it
    async fn settle<G: Send>(&self, acquired: fairsync::Result<Option<G>>) -> Result<Outcome> {
        match acquired {
            Ok(Some(guard)) => {
                self.hold().await;
                drop(guard);
                Ok(Outcome::Acquired)
            }
            Ok(None) => Ok(Outcome::TimedOut),
            Err(error) => Outcome::from_error(error),
        }
    }
}

/// Run the scenario selected by `args`
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a worker task panics,
/// or a wait fails for a reason other than timeout or cancellation.
pub async fn run_scenario(args: &Args) -> Result<DriverStats> {
    let timeout = args
        .timeout()
        .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
    let start_time = Instant::now();

    let total = u64::try_from(args.total_waits()).unwrap_or(u64::MAX);
    let ctx = Arc::new(RunContext {
        timeout,
        token: CancellationToken::new(),
        track_callers: args.track_callers,
        hold: args.hold(),
        iterations: args.iterations,
        progress: ProgressTracker::new(total, args.progress),
    });
    let counters = SyncCounters::new();
    let options = SyncOptions::new()
        .counters(Arc::clone(&counters))
        .track_callers(args.track_callers)
        .initial_capacity(args.tasks);

    let canceler = args.cancel_after_ms.map(|millis| {
        let token = ctx.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            warn!("Canceling outstanding waits after {}ms", millis);
            token.cancel();
        })
    });

    info!(
        "Driving {:?}: {} tasks x {} iterations",
        args.scenario, args.tasks, args.iterations
    );
    let (tally, reordered) = match args.scenario {
        Scenario::Mutex => (run_mutex(&ctx, args.tasks, options).await?, 0),
        Scenario::Semaphore => (
            run_semaphore(&ctx, args.tasks, args.permits, options).await?,
            0,
        ),
        Scenario::Rwlock => (run_rwlock(&ctx, args.tasks, options).await?, 0),
        Scenario::Event => (run_event(&ctx, args.tasks, options).await?, 0),
        Scenario::Pipe => run_pipe(&ctx, args.total_waits()).await?,
    };

    if let Some(canceler) = canceler {
        canceler.abort();
    }
    ctx.progress.finish();

    Ok(DriverStats {
        scenario: args.scenario,
        tally,
        reordered,
        counters: (args.scenario != Scenario::Pipe).then(|| counters.snapshot()),
        duration: start_time.elapsed(),
    })
}

fn spawn_workers<F, Fut>(
    ctx: &Arc<RunContext>,
    tasks: usize,
    worker: F,
) -> Vec<JoinHandle<Result<Tally>>>
where
    F: Fn(usize, Arc<RunContext>) -> Fut,
    Fut: Future<Output = Result<Tally>> + Send + 'static,
{
    (0..tasks)
        .map(|task| tokio::spawn(worker(task, Arc::clone(ctx))))
        .collect()
}

async fn join_workers(handles: Vec<JoinHandle<Result<Tally>>>) -> Result<Tally> {
    let mut tally = Tally::default();
    for handle in handles {
        tally.merge(handle.await??);
    }
    Ok(tally)
}

/// Let workers queue up, then log who is waiting
async fn log_suspended(name: &str, snapshot: impl FnOnce() -> Vec<CallerTag>) {
    tokio::task::yield_now().await;
    let callers = snapshot();
    if let Some(head) = callers.first() {
        debug!(queued = callers.len(), head = %head, "{} suspended callers", name);
    }
}

async fn run_mutex(ctx: &Arc<RunContext>, tasks: usize, options: SyncOptions) -> Result<Tally> {
    let lock = AsyncExclusiveLock::with_options(options);
    let handles = spawn_workers(ctx, tasks, |task, ctx| {
        let lock = lock.clone();
        async move {
            let mut tally = Tally::default();
            for _ in 0..ctx.iterations {
                let acquired = lock.acquire(ctx.wait_options(task)).await;
                let outcome = ctx.settle(acquired).await?;
                ctx.record(&mut tally, outcome);
            }
            Ok(tally)
        }
    });
    log_suspended("mutex", || lock.suspended_callers()).await;

    let tally = join_workers(handles).await?;
    lock.dispose_async().await?;
    Ok(tally)
}

async fn run_semaphore(
    ctx: &Arc<RunContext>,
    tasks: usize,
    permits: usize,
    options: SyncOptions,
) -> Result<Tally> {
    let sem = Semaphore::with_options(permits, permits, options)?;
    let handles = spawn_workers(ctx, tasks, |task, ctx| {
        let sem = sem.clone();
        // Every fourth worker asks for two permits at once
        let want = if permits > 1 && task % 4 == 0 { 2 } else { 1 };
        async move {
            let mut tally = Tally::default();
            for _ in 0..ctx.iterations {
                let acquired = sem.acquire_many(want, ctx.wait_options(task)).await;
                let outcome = ctx.settle(acquired).await?;
                ctx.record(&mut tally, outcome);
            }
            Ok(tally)
        }
    });
    log_suspended("semaphore", || sem.suspended_callers()).await;

    let tally = join_workers(handles).await?;
    sem.dispose_async().await?;
    Ok(tally)
}

async fn run_rwlock(ctx: &Arc<RunContext>, tasks: usize, options: SyncOptions) -> Result<Tally> {
    let lock = AsyncReaderWriterLock::with_options(options);
    let handles = spawn_workers(ctx, tasks, |task, ctx| {
        let lock = lock.clone();
        let writer = task % 4 == 0;
        async move {
            let mut tally = Tally::default();
            for _ in 0..ctx.iterations {
                let outcome = if writer {
                    ctx.settle(lock.write(ctx.wait_options(task)).await).await?
                } else {
                    ctx.settle(lock.read(ctx.wait_options(task)).await).await?
                };
                ctx.record(&mut tally, outcome);
            }
            Ok(tally)
        }
    });
    log_suspended("rwlock", || lock.suspended_callers()).await;

    let tally = join_workers(handles).await?;
    lock.dispose_async().await?;
    Ok(tally)
}

async fn run_event(ctx: &Arc<RunContext>, tasks: usize, options: SyncOptions) -> Result<Tally> {
    let event = AsyncManualResetEvent::with_options(false, options);
    let controller = tokio::spawn({
        let event = event.clone();
        let ctx = Arc::clone(ctx);
        async move {
            for _ in 0..ctx.iterations {
                ctx.hold().await;
                let released = event.set();
                debug!(released, "event set");
                tokio::task::yield_now().await;
                event.reset();
            }
            // Leave it set so late waiters pass
            event.set();
        }
    });
    let handles = spawn_workers(ctx, tasks, |task, ctx| {
        let event = event.clone();
        async move {
            let mut tally = Tally::default();
            for _ in 0..ctx.iterations {
                let outcome = Outcome::from_wait(event.wait(ctx.wait_options(task)).await)?;
                ctx.record(&mut tally, outcome);
            }
            Ok(tally)
        }
    });
    log_suspended("event", || event.suspended_callers()).await;

    let tally = join_workers(handles).await?;
    controller.await?;
    event.dispose_async().await?;
    Ok(tally)
}

/// Deterministic spread of completion delays, up to ten holds
fn staggered_delay(index: usize, hold: Duration) -> Duration {
    let slot = u32::try_from(index.wrapping_mul(7919) % 1000).unwrap_or(0);
    hold.max(Duration::from_micros(1)) * slot / 100
}

async fn run_pipe(ctx: &Arc<RunContext>, operations: usize) -> Result<(Tally, u64)> {
    let pipe = TaskCompletionPipe::with_capacity(operations);
    for index in 0..operations {
        let delay = staggered_delay(index, ctx.hold);
        pipe.add(async move {
            tokio::time::sleep(delay).await;
            index
        })?;
    }
    pipe.complete()?;

    let mut tally = Tally::default();
    let mut reordered = 0;
    let mut highest: Option<usize> = None;
    loop {
        match pipe.wait_to_read(ctx.wait_options(0)).await {
            Ok(true) => {
                while let Some(index) = pipe.try_read() {
                    if highest.is_some_and(|highest| index < highest) {
                        reordered += 1;
                    }
                    highest = highest.max(Some(index));
                    ctx.record(&mut tally, Outcome::Acquired);
                }
            }
            Ok(false) => break,
            Err(WaitError::TimedOut) => {
                tally.record(Outcome::TimedOut);
                tokio::task::yield_now().await;
            }
            Err(WaitError::Canceled) => {
                tally.record(Outcome::Canceled);
                warn!(remaining = pipe.scheduled(), "pipe drain canceled");
                break;
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok((tally, reordered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::from_wait(Ok(true)).unwrap(), Outcome::Acquired);
        assert_eq!(Outcome::from_wait(Ok(false)).unwrap(), Outcome::TimedOut);
        assert_eq!(
            Outcome::from_error(WaitError::Canceled).unwrap(),
            Outcome::Canceled
        );
        assert!(matches!(
            Outcome::from_error(WaitError::Disposed),
            Err(DriverError::Wait(WaitError::Disposed))
        ));
    }

    #[test]
    fn test_tally_merge() {
        let mut tally = Tally::default();
        tally.record(Outcome::Acquired);
        tally.record(Outcome::TimedOut);
        let mut other = Tally::default();
        other.record(Outcome::Canceled);
        tally.merge(other);
        assert_eq!(
            tally,
            Tally {
                acquired: 1,
                timed_out: 1,
                canceled: 1
            }
        );
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn test_staggered_delay_is_bounded() {
        let hold = Duration::from_micros(50);
        for index in 0..2000 {
            assert!(staggered_delay(index, hold) < hold * 10);
        }
        assert_eq!(staggered_delay(0, hold), Duration::ZERO);
    }
}
