//! Persisted workflow records.
//!
//! Five logical collections: definitions, versions, instances, execution
//! logs and approvals (plus the vote rows that back approval de-duplication).
//! Definitions and versions are shared; an instance owns its logs and
//! approvals.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::graph::{NodeKind, WorkflowGraph};

// ─────────────────────────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle label of a version. Only affects new starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Published,
    Archived,
}

string_enum!(VersionStatus {
    Draft => "draft",
    Published => "published",
    Archived => "archived",
});

/// Instance state machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Actively executing nodes on some caller's thread.
    Running,
    /// Suspended at one or more approval/wait nodes.
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(InstanceStatus {
    Running => "running",
    Waiting => "waiting",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl InstanceStatus {
    /// Terminal states are never reopened.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one execution log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Done,
    Waiting,
    Failed,
}

string_enum!(LogStatus {
    Done => "done",
    Waiting => "waiting",
    Failed => "failed",
});

/// Status of an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

string_enum!(ApprovalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Expired => "expired",
    Cancelled => "cancelled",
});

/// A single voter's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
}

string_enum!(VoteDecision {
    Approve => "approve",
    Reject => "reject",
});

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Named, versioned workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    /// Unique, human-chosen identifier used to start instances.
    pub slug: String,
    pub name: String,
    pub description: String,
    /// Informational trigger classification (e.g. `manual`, `event`, `scheduled`).
    pub trigger_type: String,
    /// Soft-disable flag; inactive definitions cannot start new instances.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable graph under a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: String,
    pub definition_id: String,
    /// Monotonic per definition, starting at 1.
    pub version_number: i64,
    pub graph: WorkflowGraph,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// One execution of a pinned version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub definition_id: String,
    /// Pinned at start; never changes.
    pub version_id: String,
    pub status: InstanceStatus,
    pub context: WorkflowContext,
    /// Original trigger payload, kept for administrative restarts.
    pub trigger_payload: Value,
    /// Live branch heads: suspended nodes while waiting, the failing node on failure.
    pub current_nodes: BTreeSet<String>,
    pub error: Option<String>,
    /// Optimistic concurrency token; bumped by every persisted transition.
    pub lock_version: i64,
    /// Instance this one was restarted from, if any.
    pub restarted_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Whether the instance is suspended at `node_id`.
    pub fn is_at(&self, node_id: &str) -> bool {
        self.current_nodes.contains(node_id)
    }
}

/// Audit row for one visited node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub instance_id: String,
    pub node_id: String,
    pub node_type: NodeKind,
    pub status: LogStatus,
    pub output: Value,
    pub error: Option<String>,
    /// When a timer wait becomes due.
    pub resume_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Human-approval gate state for one approval node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowApproval {
    pub id: String,
    pub instance_id: String,
    pub node_id: String,
    pub execution_log_id: String,
    /// Who may vote, e.g. `member` or `role`.
    pub approver_type: String,
    /// Full resolved approval settings, including the approver list.
    pub approver_config: Value,
    pub required_count: u32,
    pub approved_count: u32,
    pub rejected_count: u32,
    pub status: ApprovalStatus,
    /// Whether voters may vote in any order.
    pub allow_parallel: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl WorkflowApproval {
    /// Total votes counted so far.
    pub fn votes_cast(&self) -> u32 {
        self.approved_count + self.rejected_count
    }
}

/// One voter's recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub id: String,
    pub approval_id: String,
    pub voter_id: String,
    pub decision: VoteDecision,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_text() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Waiting,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
            InstanceStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert_eq!(
            "expired".parse::<ApprovalStatus>().unwrap(),
            ApprovalStatus::Expired
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = "paused".parse::<InstanceStatus>().unwrap_err();
        assert!(err.contains("InstanceStatus"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
        assert!(!InstanceStatus::Waiting.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_serde_matches_text() {
        assert_eq!(
            serde_json::to_string(&VoteDecision::Reject).unwrap(),
            "\"reject\""
        );
        assert_eq!(LogStatus::Waiting.to_string(), "waiting");
    }
}
