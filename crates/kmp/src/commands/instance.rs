//! Instance command - inspect instances and their execution log.

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::style;

use kmp_workflow::{ExecutionLog, InstanceStatus, LogStatus, WorkflowInstance};

use super::{Context, approvals, dim, field, heading};

#[derive(Args, Debug)]
pub struct InstanceArgs {
    #[command(subcommand)]
    pub command: InstanceCommand,
}

#[derive(Subcommand, Debug)]
pub enum InstanceCommand {
    /// Show an instance with its context
    Show {
        /// Instance id
        instance_id: String,
    },

    /// List instances
    List {
        /// Only instances in this status (running, waiting, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show the execution log of an instance
    Log {
        /// Instance id
        instance_id: String,
    },

    /// List the approvals opened by an instance
    Approvals {
        /// Instance id
        instance_id: String,
    },
}

pub async fn run(args: InstanceArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let engine = &services.engine;

    match args.command {
        InstanceCommand::Show { instance_id } => {
            ctx.emit(engine.get_instance(&instance_id), |i| print_instance(i, ctx.verbose))
        }
        InstanceCommand::List { status } => {
            let status = status
                .map(|s| s.parse::<InstanceStatus>())
                .transpose()
                .map_err(|e| anyhow!(e))?;
            ctx.emit(engine.list_instances(status), |instances| {
                if instances.is_empty() {
                    println!("{}", dim("No instances"));
                    return;
                }
                heading("Instances");
                for i in instances {
                    println!(
                        "  {}  {:<10} {}",
                        style(&i.id).bold(),
                        i.status.to_string(),
                        dim(i.created_at.format("%Y-%m-%d %H:%M"))
                    );
                }
            })
        }
        InstanceCommand::Log { instance_id } => {
            ctx.emit(engine.execution_log(&instance_id), |logs| print_log(logs))
        }
        InstanceCommand::Approvals { instance_id } => {
            ctx.emit(engine.approvals_for(&instance_id), |list| {
                if list.is_empty() {
                    println!("{}", dim("No approvals"));
                    return;
                }
                heading("Approvals");
                for a in list {
                    approvals::print_row(a);
                    println!("      {}", a.status);
                }
            })
        }
    }
}

fn print_instance(i: &WorkflowInstance, verbose: bool) {
    heading("Instance");
    field("Id", &i.id);
    field("Status", i.status);
    field("Version", &i.version_id);
    if !i.current_nodes.is_empty() {
        let nodes: Vec<&str> = i.current_nodes.iter().map(String::as_str).collect();
        field("At", nodes.join(", "));
    }
    if let Some(ref error) = i.error {
        field("Error", error);
    }
    if let Some(ref from) = i.restarted_from {
        field("Restarted from", from);
    }
    field("Created", i.created_at.to_rfc3339());
    if let Some(done) = i.completed_at {
        field("Finished", done.to_rfc3339());
    }
    if verbose {
        println!();
        println!("{}", style("Context").bold());
        match serde_json::to_string_pretty(&i.context) {
            Ok(text) => println!("{}", text),
            Err(e) => println!("{}", dim(format!("(unprintable: {})", e))),
        }
    }
}

fn print_log(logs: &[ExecutionLog]) {
    if logs.is_empty() {
        println!("{}", dim("No log rows"));
        return;
    }
    heading("Execution Log");
    for row in logs {
        let status = match row.status {
            LogStatus::Done => style(row.status.to_string()).green(),
            LogStatus::Waiting => style(row.status.to_string()).yellow(),
            LogStatus::Failed => style(row.status.to_string()).red(),
        };
        println!(
            "  {}  {:<20} {:<10} {}",
            dim(row.started_at.format("%H:%M:%S")),
            row.node_id,
            row.node_type.to_string(),
            status
        );
        if let Some(ref error) = row.error {
            println!("      {}", style(error).red());
        }
    }
}
