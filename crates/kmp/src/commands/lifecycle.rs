//! Instance lifecycle commands: start, resume, cancel, restart.

use anyhow::Result;
use clap::Args;
use console::style;

use kmp_workflow::{ExecutionReport, InstanceStatus, ResumeOutcome};

use super::{Context, dim, parse_json_arg};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Definition slug
    pub slug: String,

    /// Trigger payload (JSON)
    #[arg(short, long, default_value = "{}")]
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Instance id
    pub instance_id: String,

    /// Node the instance is waiting at
    pub node_id: String,

    /// Output port to follow
    #[arg(short, long)]
    pub port: String,

    /// Data merged into the instance context (JSON)
    #[arg(short, long)]
    pub data: Option<String>,
}

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Instance id
    pub instance_id: String,

    /// Reason recorded on the instance
    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct RestartArgs {
    /// Instance id to restart from
    pub instance_id: String,
}

pub async fn start(args: StartArgs, ctx: &Context) -> Result<()> {
    let payload = parse_json_arg("payload", &args.payload)?;
    let services = ctx.services()?;
    let result = services.engine.start_workflow(&args.slug, payload).await;
    ctx.emit(result, print_report)
}

pub async fn resume(args: ResumeArgs, ctx: &Context) -> Result<()> {
    let data = match args.data {
        Some(ref text) => parse_json_arg("data", text)?,
        None => serde_json::Value::Null,
    };
    let services = ctx.services()?;
    let result = services
        .engine
        .resume_workflow(&args.instance_id, &args.node_id, &args.port, data)
        .await;
    ctx.emit(result, print_outcome)
}

pub async fn cancel(args: CancelArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let result = services
        .engine
        .cancel_workflow(&args.instance_id, args.reason.as_deref())
        .await;
    ctx.emit(result, |instance| {
        println!("Cancelled {}", style(&instance.id).bold());
    })
}

pub async fn restart(args: RestartArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let result = services.engine.restart_workflow(&args.instance_id).await;
    ctx.emit(result, |report| {
        println!("Restarted from {}", dim(&args.instance_id));
        print_report(report);
    })
}

pub fn print_report(report: &ExecutionReport) {
    let status = match report.status {
        InstanceStatus::Completed => style(report.status.to_string()).green(),
        InstanceStatus::Waiting => style(report.status.to_string()).yellow(),
        InstanceStatus::Failed | InstanceStatus::Cancelled => style(report.status.to_string()).red(),
        InstanceStatus::Running => style(report.status.to_string()).cyan(),
    };
    println!("Instance {} {}", style(&report.instance_id).bold(), status);
    if !report.current_nodes.is_empty() {
        let nodes: Vec<&str> = report.current_nodes.iter().map(String::as_str).collect();
        println!("  waiting at: {}", nodes.join(", "));
    }
    println!("  {}", dim(format!("{} step(s)", report.steps)));
}

fn print_outcome(outcome: &ResumeOutcome) {
    match outcome {
        ResumeOutcome::Advanced(report) => print_report(report),
        ResumeOutcome::Stale { instance_id, reason } => {
            println!(
                "{} signal for {} ignored ({:?})",
                style("Stale").yellow(),
                instance_id,
                reason
            );
        }
    }
}
