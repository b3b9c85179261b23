//! Error types for the workflow engine.

use thiserror::Error;

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur during workflow operations.
///
/// Expected failure modes (missing definitions, failed actions, rejected
/// votes) are variants here; a stale resume signal is not an error and is
/// reported through [`crate::engine::ResumeOutcome::Stale`] instead.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No definition with the given slug or id.
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(String),

    /// The definition exists but has been soft-disabled.
    #[error("Workflow definition is inactive: {0}")]
    DefinitionInactive(String),

    /// The definition has no published version to start from.
    #[error("No published version for workflow: {0}")]
    NoPublishedVersion(String),

    /// Definition slugs are unique.
    #[error("Workflow slug already exists: {0}")]
    DuplicateSlug(String),

    /// Definition metadata is unusable (empty slug or name, bad characters).
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// No version with the given id.
    #[error("Workflow version not found: {0}")]
    VersionNotFound(String),

    /// No instance with the given id.
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// A resume signal arrived for an instance that is not suspended.
    #[error("Workflow instance {instance_id} is not waiting (status: {status})")]
    InstanceNotWaiting { instance_id: String, status: String },

    /// The instance already reached a terminal state.
    #[error("Workflow instance {instance_id} is already {status}")]
    InstanceTerminal { instance_id: String, status: String },

    /// No outgoing edge matches the selected port.
    #[error("No edge from node '{node_id}' matches port '{port}' (instance {instance_id})")]
    NoMatchingEdge {
        instance_id: String,
        node_id: String,
        port: String,
    },

    /// Traversal exceeded the per-call step ceiling.
    #[error("Workflow cycle detected: instance {instance_id} exceeded {limit} steps in one call")]
    WorkflowCycleDetected { instance_id: String, limit: usize },

    /// An action or condition reported failure.
    #[error("Action '{action}' failed at node '{node_id}': {reason}")]
    ActionExecutionFailed {
        instance_id: String,
        node_id: String,
        action: String,
        reason: String,
    },

    /// No approval with the given id.
    #[error("Approval not found: {0}")]
    ApprovalNotFound(String),

    /// Votes are only accepted while the approval is pending.
    #[error("Approval {approval_id} is not pending (status: {status})")]
    ApprovalNotPending { approval_id: String, status: String },

    /// The voter already voted on this approval.
    #[error("Voter '{voter_id}' already voted on approval {approval_id}")]
    DuplicateVote {
        approval_id: String,
        voter_id: String,
    },

    /// Sequential approvals accept votes in approver order only.
    #[error("Voter '{voter_id}' is out of turn on approval {approval_id} (expected '{expected}')")]
    ApprovalOutOfTurn {
        approval_id: String,
        voter_id: String,
        expected: String,
    },

    /// The graph is malformed (dangling edge, missing trigger, bad node config).
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// A `{{...}}` parameter template could not be resolved.
    #[error("Template error: {0}")]
    InvalidTemplate(String),

    /// Action/condition registration failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// The resume queue has shut down.
    #[error("Resume queue closed")]
    QueueClosed,

    /// The resume queue is at capacity.
    #[error("Resume queue full")]
    QueueFull,

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DefinitionNotFound(_) => "DefinitionNotFound",
            Self::DefinitionInactive(_) => "DefinitionInactive",
            Self::NoPublishedVersion(_) => "NoPublishedVersion",
            Self::DuplicateSlug(_) => "DuplicateSlug",
            Self::InvalidDefinition(_) => "InvalidDefinition",
            Self::VersionNotFound(_) => "VersionNotFound",
            Self::InstanceNotFound(_) => "InstanceNotFound",
            Self::InstanceNotWaiting { .. } => "InstanceNotWaiting",
            Self::InstanceTerminal { .. } => "InstanceTerminal",
            Self::NoMatchingEdge { .. } => "NoMatchingEdge",
            Self::WorkflowCycleDetected { .. } => "WorkflowCycleDetected",
            Self::ActionExecutionFailed { .. } => "ActionExecutionFailed",
            Self::ApprovalNotFound(_) => "ApprovalNotFound",
            Self::ApprovalNotPending { .. } => "ApprovalNotPending",
            Self::DuplicateVote { .. } => "DuplicateVote",
            Self::ApprovalOutOfTurn { .. } => "ApprovalOutOfTurn",
            Self::InvalidGraph(_) => "InvalidGraph",
            Self::InvalidTemplate(_) => "InvalidTemplate",
            Self::Registry(_) => "Registry",
            Self::QueueClosed => "QueueClosed",
            Self::QueueFull => "QueueFull",
            Self::Database(_) => "Database",
            Self::Migration(_) => "Migration",
            Self::Serde(_) => "Serialization",
            Self::Io(_) => "Io",
        }
    }

    /// The instance a traversal failure belongs to, if any.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::InstanceNotWaiting { instance_id, .. }
            | Self::InstanceTerminal { instance_id, .. }
            | Self::NoMatchingEdge { instance_id, .. }
            | Self::WorkflowCycleDetected { instance_id, .. }
            | Self::ActionExecutionFailed { instance_id, .. } => Some(instance_id),
            Self::InstanceNotFound(id) => Some(id),
            _ => None,
        }
    }
}
