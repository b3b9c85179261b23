//! Approval gates: settings, rejection policies and vote aggregation.
//!
//! An approval node's parameters are resolved against the instance context
//! when the node is reached and frozen into [`ApprovalSettings`], stored as
//! the approval's `approver_config`. Votes are counted with a single
//! conditional write guarded by `status = 'pending'`, and the
//! `(approval_id, voter_id)` uniqueness constraint rejects duplicates even
//! under concurrent submission.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{ResumeOutcome, WorkflowEngine};
use crate::error::{Result, WorkflowError};
use crate::graph::{PORT_APPROVED, PORT_REJECTED};
use crate::model::{ApprovalStatus, ApprovalVote, VoteDecision, WorkflowApproval};

const DEFAULT_APPROVER_TYPE: &str = "member";

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// When a rejection resolves a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// The first rejection rejects the gate.
    #[default]
    FirstRejection,
    /// Reject once `count` rejections are in, or approval became unreachable.
    Threshold { count: u32 },
    /// Reject once rejections are a strict majority of the approvers, or
    /// approval became unreachable. Without an approver list a rejection
    /// needs as many votes as approval does.
    Majority,
}

impl RejectionPolicy {
    /// Parse the `rejection_policy` parameter: a name, or a tagged object
    /// (`{ type = "threshold", count = 2 }`).
    pub fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::String(name) => match name.as_str() {
                "first_rejection" => Ok(Self::FirstRejection),
                "majority" => Ok(Self::Majority),
                "threshold" => Err("threshold policy needs a count".into()),
                other => Err(format!("unknown rejection policy '{}'", other)),
            },
            Value::Object(_) => serde_json::from_value(value.clone()).map_err(|e| e.to_string()),
            other => Err(format!("invalid rejection policy {}", other)),
        }
    }

    /// Decide the gate from the current tally.
    ///
    /// Approval is checked first: a vote that reaches `required` approves the
    /// gate whatever the policy.
    pub fn evaluate(&self, tally: &Tally) -> Verdict {
        if tally.approved >= tally.required {
            return Verdict::Approved;
        }

        let rejected = match self {
            Self::FirstRejection => tally.rejected >= 1,
            Self::Threshold { count } => tally.rejected >= (*count).max(1) || tally.unreachable(),
            Self::Majority => {
                let majority = match tally.eligible {
                    Some(eligible) => tally.rejected * 2 > eligible,
                    None => tally.rejected >= tally.required,
                };
                majority || tally.unreachable()
            }
        };

        if rejected {
            Verdict::Rejected
        } else {
            Verdict::Pending
        }
    }
}

/// Resolved configuration of one approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    pub approver_type: String,
    /// Ordered approver ids; the voting order when `allow_parallel` is false.
    #[serde(default)]
    pub approvers: Vec<String>,
    pub required_count: u32,
    pub allow_parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
}

impl ApprovalSettings {
    /// Build settings from an approval node's resolved parameters.
    ///
    /// Recognised keys: `approver_type`, `approvers`, `required_count`,
    /// `allow_parallel`, `deadline_secs` (relative to `now`) or `deadline`
    /// (RFC 3339), `rejection_policy`.
    pub fn from_params(params: &Map<String, Value>, now: DateTime<Utc>) -> std::result::Result<Self, String> {
        let approver_type = match params.get("approver_type") {
            None | Some(Value::Null) => DEFAULT_APPROVER_TYPE.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(format!("approver_type must be a string, got {}", other)),
        };

        let approvers = match params.get("approvers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(format!("approver ids must be strings, got {}", other)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(Value::String(s)) => vec![s.clone()],
            Some(other) => return Err(format!("approvers must be a list, got {}", other)),
        };

        let required_count = match params.get("required_count") {
            None | Some(Value::Null) => 1,
            Some(v) => param_u64(v)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| format!("required_count must be a positive integer, got {}", v))?,
        };
        if required_count == 0 {
            return Err("required_count must be at least 1".into());
        }
        if !approvers.is_empty() && required_count as usize > approvers.len() {
            return Err(format!(
                "required_count {} exceeds the {} listed approvers",
                required_count,
                approvers.len()
            ));
        }

        let allow_parallel = match params.get("allow_parallel") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(format!("allow_parallel must be a boolean, got {}", other)),
        };
        if !allow_parallel && approvers.is_empty() {
            return Err("sequential approval needs an approvers list".into());
        }

        let deadline = match (params.get("deadline_secs"), params.get("deadline")) {
            (Some(secs), _) if !secs.is_null() => {
                let secs = param_u64(secs)
                    .and_then(|n| i64::try_from(n).ok())
                    .ok_or_else(|| format!("deadline_secs must be a non-negative integer, got {}", secs))?;
                Some(now + Duration::seconds(secs))
            }
            (_, Some(at)) if !at.is_null() => Some(param_datetime(at)?),
            _ => None,
        };

        let rejection_policy = match params.get("rejection_policy") {
            None | Some(Value::Null) => RejectionPolicy::default(),
            Some(v) => RejectionPolicy::from_value(v)?,
        };

        Ok(Self {
            approver_type,
            approvers,
            required_count,
            allow_parallel,
            deadline,
            rejection_policy,
        })
    }

    /// Read back the settings frozen into an approval row.
    pub fn from_approval(approval: &WorkflowApproval) -> Result<Self> {
        Ok(serde_json::from_value(approval.approver_config.clone())?)
    }

    /// The voter whose turn it is in sequential mode.
    pub fn expected_voter(&self, votes_cast: u32) -> Option<&str> {
        self.approvers.get(votes_cast as usize).map(String::as_str)
    }

    fn eligible(&self) -> Option<u32> {
        if self.approvers.is_empty() {
            None
        } else {
            u32::try_from(self.approvers.len()).ok()
        }
    }
}

/// Accept integers, and numeric strings produced by text templates.
pub(crate) fn param_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn param_datetime(value: &Value) -> std::result::Result<DateTime<Utc>, String> {
    let text = value
        .as_str()
        .ok_or_else(|| format!("expected an RFC 3339 timestamp, got {}", value))?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tally
// ─────────────────────────────────────────────────────────────────────────────

/// Vote counts of a gate, as seen by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub approved: u32,
    pub rejected: u32,
    pub required: u32,
    /// Number of listed approvers, when known.
    pub eligible: Option<u32>,
}

impl Tally {
    pub fn of(approval: &WorkflowApproval, settings: &ApprovalSettings) -> Self {
        Self {
            approved: approval.approved_count,
            rejected: approval.rejected_count,
            required: approval.required_count,
            eligible: settings.eligible(),
        }
    }

    /// Whether the outstanding voters can no longer reach `required`.
    fn unreachable(&self) -> bool {
        match self.eligible {
            Some(eligible) => {
                let outstanding = eligible.saturating_sub(self.approved + self.rejected);
                self.approved + outstanding < self.required
            }
            None => false,
        }
    }
}

/// Outcome of evaluating a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Approved,
    Rejected,
}

impl Verdict {
    fn resolution(&self) -> Option<(ApprovalStatus, &'static str)> {
        match self {
            Self::Pending => None,
            Self::Approved => Some((ApprovalStatus::Approved, PORT_APPROVED)),
            Self::Rejected => Some((ApprovalStatus::Rejected, PORT_REJECTED)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a recorded vote.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    /// The approval after this vote.
    pub approval: WorkflowApproval,
    pub verdict: Verdict,
    /// Set when this vote resolved the gate and resumed the instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeOutcome>,
}

/// Records votes and resumes the owning instance once a gate resolves.
pub struct ApprovalAggregator {
    engine: Arc<WorkflowEngine>,
}

impl ApprovalAggregator {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Record one voter's decision.
    ///
    /// Fails with `ApprovalNotFound`, `ApprovalNotPending`, `DuplicateVote`
    /// or `ApprovalOutOfTurn`. A resolving vote resumes the instance through
    /// the `approved` or `rejected` port; errors from that traversal are
    /// returned as-is (the vote itself stays recorded).
    pub async fn record_vote(
        &self,
        approval_id: &str,
        voter_id: &str,
        decision: VoteDecision,
        notes: Option<&str>,
    ) -> Result<VoteOutcome> {
        let store = self.engine.store();

        let approval = store
            .get_approval(approval_id)?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(not_pending(&approval));
        }

        let settings = ApprovalSettings::from_approval(&approval)?;
        // A repeat voter is a duplicate even when it is no longer their turn.
        // The unique insert below still guards concurrent submissions.
        if store.list_votes(approval_id)?.iter().any(|v| v.voter_id == voter_id) {
            return Err(WorkflowError::DuplicateVote {
                approval_id: approval_id.to_string(),
                voter_id: voter_id.to_string(),
            });
        }
        if !settings.allow_parallel {
            let expected = settings.expected_voter(approval.votes_cast());
            if expected != Some(voter_id) {
                return Err(WorkflowError::ApprovalOutOfTurn {
                    approval_id: approval_id.to_string(),
                    voter_id: voter_id.to_string(),
                    expected: expected.unwrap_or("nobody").to_string(),
                });
            }
        }

        let vote = ApprovalVote {
            id: Uuid::new_v4().to_string(),
            approval_id: approval_id.to_string(),
            voter_id: voter_id.to_string(),
            decision,
            notes: notes.map(String::from),
            created_at: Utc::now(),
        };

        let Some(mut updated) = store.record_vote(&vote)? else {
            // Resolved between our read and the counter update.
            let current = store
                .get_approval(approval_id)?
                .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))?;
            return Err(not_pending(&current));
        };

        let verdict = settings.rejection_policy.evaluate(&Tally::of(&updated, &settings));
        debug!(
            approval_id,
            voter_id,
            decision = %decision,
            approved = updated.approved_count,
            rejected = updated.rejected_count,
            ?verdict,
            "Vote recorded"
        );

        let Some((status, port)) = verdict.resolution() else {
            return Ok(VoteOutcome {
                approval: updated,
                verdict,
                resume: None,
            });
        };

        if !store.resolve_approval(approval_id, status)? {
            warn!(approval_id, "Approval resolved concurrently; not resuming");
            let approval = store.get_approval(approval_id)?.unwrap_or(updated);
            return Ok(VoteOutcome {
                approval,
                verdict,
                resume: None,
            });
        }
        updated.status = status;
        updated.resolved_at = Some(Utc::now());

        info!(
            approval_id,
            instance_id = %updated.instance_id,
            node_id = %updated.node_id,
            status = %status,
            "Approval resolved"
        );

        let resume = self
            .engine
            .resume_workflow(&updated.instance_id, &updated.node_id, port, Value::Null)
            .await?;

        Ok(VoteOutcome {
            approval: updated,
            verdict,
            resume: Some(resume),
        })
    }
}

fn not_pending(approval: &WorkflowApproval) -> WorkflowError {
    WorkflowError::ApprovalNotPending {
        approval_id: approval.id.clone(),
        status: approval.status.to_string(),
    }
}
