//! Deadline sweep.
//!
//! One pass expires every pending approval whose deadline has passed and
//! resumes every timer wait that has become due. Scheduling the passes is
//! the caller's job (the `kmp worker` command runs one per interval).
//! Failures are isolated per row: they are logged, collected in the
//! [`SweepReport`], and the rest of the batch still runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kmp_config::SweepSection;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::engine::WorkflowEngine;
use crate::error::Result;
use crate::graph::{PORT_ELAPSED, PORT_EXPIRED};
use crate::model::{ApprovalStatus, ExecutionLog, WorkflowApproval};

/// A row the sweep could not process.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    /// Approval id or execution log id.
    pub id: String,
    pub instance_id: String,
    pub code: String,
    pub error: String,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Approvals this pass moved to `expired`.
    pub expired: Vec<String>,
    /// Instances resumed from an elapsed timer wait.
    pub elapsed: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.elapsed.is_empty() && self.failures.is_empty()
    }
}

/// Expires overdue approvals and wakes due timers.
pub struct DeadlineSweep {
    engine: Arc<WorkflowEngine>,
    batch_size: usize,
}

impl DeadlineSweep {
    pub fn new(engine: Arc<WorkflowEngine>, batch_size: usize) -> Self {
        Self {
            engine,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_section(engine: Arc<WorkflowEngine>, section: &SweepSection) -> Self {
        Self::new(engine, section.batch_size)
    }

    /// Run one pass as of now.
    pub async fn run(&self) -> Result<SweepReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass as of `now`.
    ///
    /// Only query failures abort the pass; per-row failures are reported.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let store = self.engine.store();
        let mut report = SweepReport::default();

        for approval in store.expired_approvals(now, self.batch_size)? {
            match self.expire(&approval).await {
                Ok(true) => report.expired.push(approval.id.clone()),
                Ok(false) => debug!(approval_id = %approval.id, "Approval resolved before expiry"),
                Err(e) => {
                    warn!(
                        approval_id = %approval.id,
                        instance_id = %approval.instance_id,
                        error = %e,
                        "Failed to expire approval"
                    );
                    report.failures.push(SweepFailure {
                        id: approval.id.clone(),
                        instance_id: approval.instance_id.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for log in store.due_waits(now, self.batch_size)? {
            match self.wake(&log).await {
                Ok(true) => report.elapsed.push(log.instance_id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        log_id = %log.id,
                        instance_id = %log.instance_id,
                        error = %e,
                        "Failed to resume elapsed wait"
                    );
                    report.failures.push(SweepFailure {
                        id: log.id.clone(),
                        instance_id: log.instance_id.clone(),
                        code: e.code().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.is_empty() {
            info!(
                expired = report.expired.len(),
                elapsed = report.elapsed.len(),
                failures = report.failures.len(),
                "Deadline sweep finished"
            );
        }
        Ok(report)
    }

    /// Expire one approval and resume through `expired`. False if another
    /// party resolved it first.
    async fn expire(&self, approval: &WorkflowApproval) -> Result<bool> {
        let store = self.engine.store();
        if !store.resolve_approval(&approval.id, ApprovalStatus::Expired)? {
            return Ok(false);
        }
        store.finish_waiting_log(
            &approval.execution_log_id,
            &json!({ "expired": true, "port": PORT_EXPIRED }),
        )?;

        info!(
            approval_id = %approval.id,
            instance_id = %approval.instance_id,
            "Approval expired"
        );

        self.engine
            .resume_workflow(&approval.instance_id, &approval.node_id, PORT_EXPIRED, Value::Null)
            .await?;
        Ok(true)
    }

    /// Resume a due timer wait through `elapsed`.
    async fn wake(&self, log: &ExecutionLog) -> Result<bool> {
        let outcome = self
            .engine
            .resume_workflow(&log.instance_id, &log.node_id, PORT_ELAPSED, Value::Null)
            .await?;
        if outcome.is_stale() {
            // The instance moved on without this timer; close the row so
            // later passes skip it.
            self.engine
                .store()
                .finish_waiting_log(&log.id, &json!({ "port": PORT_ELAPSED, "stale": true }))?;
            return Ok(false);
        }
        Ok(true)
    }
}
