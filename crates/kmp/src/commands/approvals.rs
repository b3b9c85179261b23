//! Approvals command - inspect approval gates.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;
use serde::Serialize;

use kmp_workflow::{ApprovalVote, WorkflowApproval};

use super::{Context, dim, field, heading};

#[derive(Args, Debug)]
pub struct ApprovalsArgs {
    #[command(subcommand)]
    pub command: ApprovalsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApprovalsCommand {
    /// Pending approvals a voter can vote on now
    Pending {
        /// Voter id
        voter: String,
    },

    /// Show one approval with its votes
    Show {
        /// Approval id
        approval_id: String,
    },
}

pub async fn run(args: ApprovalsArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let engine = &services.engine;

    match args.command {
        ApprovalsCommand::Pending { voter } => {
            ctx.emit(engine.pending_approvals_for(&voter), |approvals| {
                if approvals.is_empty() {
                    println!("{}", dim(format!("Nothing waiting on {}", voter)));
                    return;
                }
                heading(&format!("Pending for {}", voter));
                for a in approvals {
                    print_row(a);
                }
            })
        }
        ApprovalsCommand::Show { approval_id } => {
            let result = engine.get_approval(&approval_id).and_then(|approval| {
                let votes = engine.store().list_votes(&approval.id)?;
                Ok(ApprovalDetail { approval, votes })
            });
            ctx.emit(result, print_detail)
        }
    }
}

#[derive(Serialize)]
struct ApprovalDetail {
    approval: WorkflowApproval,
    votes: Vec<ApprovalVote>,
}

fn print_detail(detail: &ApprovalDetail) {
    let a = &detail.approval;
    heading("Approval");
    field("Id", &a.id);
    field("Instance", &a.instance_id);
    field("Node", &a.node_id);
    field("Status", a.status);
    field(
        "Votes",
        format!(
            "{} approve / {} reject (need {})",
            a.approved_count, a.rejected_count, a.required_count
        ),
    );
    if let Some(deadline) = a.deadline {
        field("Deadline", deadline.to_rfc3339());
    }
    for vote in &detail.votes {
        println!(
            "  {} {} {}",
            style(&vote.voter_id).bold(),
            vote.decision,
            dim(vote.notes.as_deref().unwrap_or(""))
        );
    }
}

pub fn print_row(a: &WorkflowApproval) {
    let deadline = a
        .deadline
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {}  {}/{}  node {}  due {}",
        style(&a.id).bold(),
        a.approved_count,
        a.required_count,
        a.node_id,
        dim(deadline)
    );
}
