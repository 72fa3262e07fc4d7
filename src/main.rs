//! qsync: contention driver for FIFO-fair async synchronization primitives
//!
//! Runs worker tasks against a mutex, semaphore, reader/writer lock, event or
//! completion pipe and prints how every wait ended.

use anyhow::{Context, Result};
use clap::Parser;
use qsync::cli::Args;
use qsync::run_scenario;
use tracing::{error, info, Level};

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging based on verbosity and quiet mode
    if !args.quiet {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(match args.verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            })
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // In quiet mode, only log errors
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::ERROR)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;
    }

    // Validate arguments
    args.validate().context("Invalid arguments")?;

    // Log startup information (unless in quiet mode)
    if !args.quiet {
        info!("Starting qsync v{}", env!("CARGO_PKG_VERSION"));
        info!("Scenario: {:?}", args.scenario);
        info!("Tasks: {}", args.tasks);
        info!("Iterations: {}", args.iterations);
        info!("Timeout: {:?}", args.timeout()?);
        info!("Worker threads: {}", args.effective_worker_threads());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.effective_worker_threads())
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match runtime.block_on(run_scenario(&args)) {
        Ok(stats) => {
            info!("Run completed successfully");
            if !args.quiet {
                println!("{stats}");
            }
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
