//! Vote command - cast a vote on a pending approval.

use anyhow::Result;
use clap::Args;
use console::style;

use kmp_workflow::{Verdict, VoteDecision};

use super::{Context, lifecycle};

#[derive(Args, Debug)]
pub struct VoteArgs {
    /// Approval id
    pub approval_id: String,

    /// Voter id
    #[arg(long)]
    pub voter: String,

    /// Vote to approve
    #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
    pub approve: bool,

    /// Vote to reject
    #[arg(long)]
    pub reject: bool,

    /// Notes stored with the vote
    #[arg(short, long)]
    pub notes: Option<String>,
}

pub async fn run(args: VoteArgs, ctx: &Context) -> Result<()> {
    let decision = if args.approve {
        VoteDecision::Approve
    } else {
        VoteDecision::Reject
    };

    let services = ctx.services()?;
    let result = services
        .aggregator
        .record_vote(&args.approval_id, &args.voter, decision, args.notes.as_deref())
        .await;

    ctx.emit(result, |outcome| {
        let a = &outcome.approval;
        println!(
            "Recorded {} from {} ({}/{} approvals, {} rejections)",
            decision,
            style(&args.voter).bold(),
            a.approved_count,
            a.required_count,
            a.rejected_count
        );
        match outcome.verdict {
            Verdict::Pending => println!("  approval still pending"),
            Verdict::Approved => println!("  {}", style("approved").green()),
            Verdict::Rejected => println!("  {}", style("rejected").red()),
        }
        if let Some(report) = outcome.resume.as_ref().and_then(|r| r.report()) {
            lifecycle::print_report(report);
        }
    })
}
