//! Worker command - the scheduler loop.
//!
//! Runs the deadline sweep every `[sweep] interval_secs` and, optionally,
//! feeds JSON-lines resume tasks from stdin into a resume worker. Stops on
//! Ctrl-C (or, with `--exit-on-eof`, when stdin closes).

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use kmp_workflow::{
    DEFAULT_QUEUE_CAPACITY, DeadlineSweep, ResumeQueue, ResumeTask, ResumeWorker, WorkerStats,
};

use super::{Context, sweep};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Read resume tasks (one JSON object per line) from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Stop once stdin is exhausted instead of waiting for Ctrl-C
    #[arg(long, requires = "stdin")]
    pub exit_on_eof: bool,

    /// Resume queue capacity
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Override [sweep] interval_secs
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

pub async fn run(args: WorkerArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let mut sweep_config = ctx.config.sweep();
    if let Some(secs) = args.interval_secs {
        sweep_config.interval_secs = secs.max(1);
    }
    let sweeper = DeadlineSweep::from_section(services.engine.clone(), &sweep_config);

    let (queue, rx) = ResumeQueue::channel(args.queue_capacity);
    let worker = tokio::spawn(ResumeWorker::new(services.engine.clone(), rx).run());

    let mut feeder = args.stdin.then(|| tokio::spawn(feed_stdin(queue.clone())));
    let mut feeding = feeder.is_some();
    drop(queue);

    let mut ticker = tokio::time::interval(Duration::from_secs(sweep_config.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        sweep_enabled = sweep_config.enabled,
        interval_secs = sweep_config.interval_secs,
        stdin = args.stdin,
        "Worker started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick(), if sweep_config.enabled => {
                match sweeper.run().await {
                    Ok(report) if !report.is_empty() && !ctx.json_output => sweep::print_report(&report),
                    Ok(report) if !report.is_empty() => println!("{}", serde_json::to_string(&report)?),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Deadline sweep failed"),
                }
            }
            fed = join_feeder(&mut feeder), if feeding => {
                feeding = false;
                match fed {
                    Ok(Ok(count)) => info!(count, "Stdin closed"),
                    Ok(Err(e)) => warn!(error = %e, "Stdin feeder failed"),
                    Err(e) => warn!(error = %e, "Stdin feeder panicked"),
                }
                if args.exit_on_eof {
                    break;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(handle) = feeder.take() {
        handle.abort();
    }
    let stats = match worker.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "Resume worker panicked");
            WorkerStats::default()
        }
    };
    report_stats(&stats, ctx)
}

/// Wait for the stdin feeder; never resolves when there is none.
async fn join_feeder(feeder: &mut Option<JoinHandle<Result<usize>>>) -> Result<Result<usize>, JoinError> {
    match feeder {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Parse JSON-lines resume tasks and enqueue them. Returns the number fed.
async fn feed_stdin(queue: ResumeQueue) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fed = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ResumeTask>(line) {
            Ok(task) => {
                queue.enqueue(task).await?;
                fed += 1;
            }
            Err(e) => warn!(error = %e, "Ignoring malformed resume task"),
        }
    }
    Ok(fed)
}

fn report_stats(stats: &WorkerStats, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        println!(
            "Resume worker: {} advanced, {} stale, {} failed",
            stats.advanced, stats.stale, stats.failed
        );
    }
    Ok(())
}
