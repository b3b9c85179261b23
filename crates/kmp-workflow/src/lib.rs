//! Durable, resumable workflow engine for KMP approval processes.
//!
//! The engine drives versioned node graphs (trigger, action, condition,
//! approval, wait, end) over persisted instances. Long pauses for human
//! approval or timers are plain persisted state; nothing is parked in memory.
//!
//! # Architecture
//!
//! ```text
//! WorkflowEngine          - start / resume / cancel / restart, traversal loop
//!     ├── Registry        - actions & conditions by key (explicit registration)
//!     ├── ContextResolver - {{context.path}} parameter templates
//!     └── WorkflowStorage - conditional writes (WorkflowStore = SQLite)
//! ApprovalAggregator      - vote recording, rejection policies
//! DeadlineSweep           - expires approvals, resumes elapsed timers
//! ResumeQueue/Worker      - async re-entry over a tokio channel
//! DefinitionService       - definitions, versions, publishing
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kmp_workflow::{Registry, WorkflowEngine, WorkflowStore, EngineConfig};
//!
//! let store = Arc::new(WorkflowStore::open_in_memory()?);
//! let registry = Arc::new(Registry::with_core()?);
//! let engine = WorkflowEngine::new(store, registry, EngineConfig::default());
//! let report = engine.start_workflow("officer-hire", json!({"member_id": 7})).await?;
//! ```

/// Implements `as_str`, `Display` and `FromStr` for a unit enum whose text
/// form is also its serde form.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

pub mod approval;
pub mod builtin;
pub mod context;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod queue;
pub mod registry;
pub mod result;
pub mod store;
pub mod sweep;

pub use approval::{ApprovalAggregator, ApprovalSettings, RejectionPolicy, Tally, Verdict, VoteOutcome};
pub use context::{
    ContextResolver, context_from_payload, merge_data, ERROR_KEY, PAYLOAD_KEY, WorkflowContext, resolve_params,
    resolve_template_string,
};
pub use definitions::{DefinitionService, ImportedWorkflow, PublishedVersion};
pub use engine::{EngineConfig, ExecutionReport, ResumeOutcome, StaleReason, WorkflowEngine};
pub use error::{Result, WorkflowError};
pub use graph::{
    DefinitionHeader, Edge, NodeKind, NodeSpec, PORT_APPROVED, PORT_DEFAULT, PORT_ELAPSED,
    PORT_EXPIRED, PORT_REJECTED, PortSelection, WorkflowFile, WorkflowGraph,
};
pub use model::{
    ApprovalStatus, ApprovalVote, ExecutionLog, InstanceStatus, LogStatus, VersionStatus,
    VoteDecision, WorkflowApproval, WorkflowDefinition, WorkflowInstance, WorkflowVersion,
};
pub use queue::{DEFAULT_QUEUE_CAPACITY, ResumeQueue, ResumeTask, ResumeWorker, WorkerStats};
pub use registry::{
    Action, CapabilityInfo, Condition, EntityField, EntityType, ParamSchema, ParamSpec, ParamType,
    Registry, WorkflowModule,
};
pub use result::ServiceResult;
pub use store::{WorkflowStorage, WorkflowStore};
pub use sweep::{DeadlineSweep, SweepFailure, SweepReport};
