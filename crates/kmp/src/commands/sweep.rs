//! Sweep command - run one deadline sweep pass.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use console::style;

use kmp_workflow::{DeadlineSweep, SweepReport};

use super::{Context, dim};

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Evaluate deadlines as of this RFC 3339 time instead of now
    #[arg(long)]
    pub at: Option<String>,

    /// Maximum rows per category (defaults to [sweep] batch_size)
    #[arg(long)]
    pub batch_size: Option<usize>,
}

pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let now = match args.at {
        Some(ref text) => DateTime::parse_from_rfc3339(text)
            .with_context(|| format!("--at '{}' is not an RFC 3339 timestamp", text))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let batch_size = args.batch_size.unwrap_or(ctx.config.sweep().batch_size);

    let services = ctx.services()?;
    let sweep = DeadlineSweep::new(services.engine.clone(), batch_size);
    let result = sweep.run_at(now).await;
    ctx.emit(result, print_report)
}

pub fn print_report(report: &SweepReport) {
    if report.is_empty() {
        println!("{}", dim("Nothing due"));
        return;
    }
    for id in &report.expired {
        println!("  {} approval {}", style("expired").yellow(), id);
    }
    for id in &report.elapsed {
        println!("  {} instance {}", style("resumed").green(), id);
    }
    for failure in &report.failures {
        println!(
            "  {} {} ({}): {}",
            style("failed").red(),
            failure.id,
            failure.code,
            failure.error
        );
    }
}
