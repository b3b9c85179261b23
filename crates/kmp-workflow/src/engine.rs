//! Workflow engine: the instance state machine.
//!
//! Provides [`WorkflowEngine`], which starts instances, runs the traversal
//! loop, and re-enters suspended instances on resume signals. The engine
//! holds no background tasks; every call runs on the caller's task and
//! returns once traversal completes, fails or suspends.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kmp_config::EngineSection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalSettings, param_datetime, param_u64};
use crate::context::{ERROR_KEY, context_from_payload, merge_data, resolve_params};
use crate::error::{Result, WorkflowError};
use crate::graph::{NodeKind, NodeSpec, PortSelection, WorkflowGraph};
use crate::model::{
    ApprovalStatus, ExecutionLog, InstanceStatus, LogStatus, WorkflowApproval, WorkflowInstance,
    WorkflowVersion,
};
use crate::registry::Registry;
use crate::result::ServiceResult;
use crate::store::WorkflowStorage;

/// Configuration for the workflow engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on nodes visited by one start/resume call.
    pub max_steps_per_call: usize,
}

/// Pause between attempts while another branch holds the instance.
const RESUME_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(10);

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_call: 500,
        }
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(section: &EngineSection) -> Self {
        Self {
            max_steps_per_call: section.max_steps_per_call,
        }
    }
}

/// Where an instance stands after a start/resume call returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub instance_id: String,
    pub status: InstanceStatus,
    /// Suspended branch heads (empty once completed).
    pub current_nodes: BTreeSet<String>,
    /// Nodes executed during this call.
    pub steps: usize,
}

/// Why a resume signal changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The instance is not suspended at the signalled node.
    NodeMismatch,
}

/// Result of a resume signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// The instance advanced.
    Advanced(ExecutionReport),
    /// Duplicate or late signal; a successful no-op.
    Stale {
        instance_id: String,
        reason: StaleReason,
    },
}

impl ResumeOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::Advanced(report) => Some(report),
            Self::Stale { .. } => None,
        }
    }
}

/// What a node told the traversal loop to do next.
enum Step {
    /// Continue with these target nodes.
    Next(Vec<String>),
    /// Park this branch.
    Suspend,
    /// Branch finished.
    End,
}

/// The workflow state machine.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStorage>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStorage>, registry: Arc<Registry>, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStorage> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Start / resume
    // ─────────────────────────────────────────────────────────────────────

    /// Start an instance of the published version of `slug`.
    ///
    /// Returns once the instance completed, failed or suspended. Traversal
    /// failures come back as errors carrying the instance id; the instance
    /// itself is persisted as `failed`.
    pub async fn start_workflow(&self, slug: &str, payload: Value) -> Result<ExecutionReport> {
        let definition = self
            .store
            .find_definition_by_slug(slug)?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(slug.to_string()))?;
        if !definition.is_active {
            return Err(WorkflowError::DefinitionInactive(slug.to_string()));
        }
        let version = self
            .store
            .published_version(&definition.id)?
            .ok_or_else(|| WorkflowError::NoPublishedVersion(slug.to_string()))?;

        self.launch(version, payload, None).await
    }

    /// [`start_workflow`](Self::start_workflow) in the uniform envelope.
    pub async fn start(&self, slug: &str, payload: Value) -> ServiceResult<ExecutionReport> {
        self.start_workflow(slug, payload).await.into()
    }

    /// Create an instance on `version` and run it from the trigger.
    async fn launch(
        &self,
        version: WorkflowVersion,
        payload: Value,
        restarted_from: Option<String>,
    ) -> Result<ExecutionReport> {
        let graph = version.graph;
        let trigger = graph.trigger_node()?.to_string();
        let now = Utc::now();

        let instance = WorkflowInstance {
            id: Uuid::new_v4().to_string(),
            definition_id: version.definition_id,
            version_id: version.id,
            status: InstanceStatus::Running,
            context: context_from_payload(&payload),
            trigger_payload: payload,
            current_nodes: BTreeSet::from([trigger.clone()]),
            error: None,
            lock_version: 0,
            restarted_from,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_instance(&instance)?;

        info!(
            instance_id = %instance.id,
            version_id = %instance.version_id,
            restarted_from = instance.restarted_from.as_deref().unwrap_or(""),
            "Workflow instance started"
        );

        let mut instance = instance;
        instance.current_nodes.clear();
        self.drive(instance, &graph, vec![trigger]).await
    }

    /// Deliver a resume signal to a suspended instance.
    ///
    /// Signals for a node the instance is not suspended at are successful
    /// no-ops ([`ResumeOutcome::Stale`]); this covers duplicates and signals
    /// that arrive after another caller already resumed or cancelled the
    /// node. While another branch of the instance is running, or when the
    /// claiming write loses to a concurrent transition, the signal re-reads
    /// the instance and tries again, so a live branch is never dropped.
    /// `additional_data` is merged into the top level of the context; the
    /// node's own context entry records the port taken.
    pub async fn resume_workflow(
        &self,
        instance_id: &str,
        node_id: &str,
        port: &str,
        additional_data: Value,
    ) -> Result<ResumeOutcome> {
        let (mut instance, graph) = loop {
            let mut instance = self
                .store
                .get_instance(instance_id)?
                .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))?;

            if !instance.is_at(node_id) {
                warn!(instance_id, node_id, port, "Stale resume signal: instance is not at node");
                return Ok(stale(instance_id, StaleReason::NodeMismatch));
            }
            match instance.status {
                InstanceStatus::Waiting => {}
                InstanceStatus::Running => {
                    debug!(instance_id, node_id, port, "Instance busy on another branch; retrying resume");
                    tokio::time::sleep(RESUME_RETRY_DELAY).await;
                    continue;
                }
                status => {
                    return Err(WorkflowError::InstanceNotWaiting {
                        instance_id: instance_id.to_string(),
                        status: status.to_string(),
                    });
                }
            }

            let graph = self.version_of(&instance)?.graph;
            graph.require_node(node_id)?;

            // Claim the instance: one conditional write on status + lock_version.
            instance.status = InstanceStatus::Running;
            instance.current_nodes.remove(node_id);
            merge_data(&mut instance.context, &additional_data);
            instance
                .context
                .insert(node_id.to_string(), json!({ "port": port }));
            if self.store.save_instance(&mut instance, InstanceStatus::Waiting)? {
                break (instance, graph);
            }

            debug!(instance_id, node_id, port, "Resume lost the race; re-reading instance");
            tokio::task::yield_now().await;
        };
        let node = graph.require_node(node_id)?;

        info!(instance_id, node_id, port, "Workflow instance resumed");

        if let Some(log) = self.store.waiting_log(instance_id, node_id)? {
            let output = json!({ "port": port, "data": additional_data });
            self.store.finish_waiting_log(&log.id, &output)?;
        }
        if node.kind == NodeKind::Approval {
            self.store.cancel_pending_approvals(instance_id, Some(node_id))?;
        }

        let targets = graph.select_edges(node, PortSelection::Resume(port));
        if targets.is_empty() {
            let err = WorkflowError::NoMatchingEdge {
                instance_id: instance_id.to_string(),
                node_id: node_id.to_string(),
                port: port.to_string(),
            };
            self.fail_instance(&mut instance, node_id, &err)?;
            return Err(err);
        }
        let targets = targets.into_iter().map(|e| e.target.clone()).collect();

        let report = self.drive(instance, &graph, targets).await?;
        Ok(ResumeOutcome::Advanced(report))
    }

    /// [`resume_workflow`](Self::resume_workflow) in the uniform envelope.
    pub async fn resume(
        &self,
        instance_id: &str,
        node_id: &str,
        port: &str,
        additional_data: Value,
    ) -> ServiceResult<ResumeOutcome> {
        self.resume_workflow(instance_id, node_id, port, additional_data)
            .await
            .into()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cancel / restart
    // ─────────────────────────────────────────────────────────────────────

    /// Cancel a running or waiting instance.
    ///
    /// Cooperative: an in-flight traversal notices at its next persisted
    /// step. Actions that already ran are not rolled back.
    pub async fn cancel_workflow(&self, instance_id: &str, reason: Option<&str>) -> Result<WorkflowInstance> {
        loop {
            let mut instance = self
                .store
                .get_instance(instance_id)?
                .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))?;
            if instance.status.is_terminal() {
                return Err(WorkflowError::InstanceTerminal {
                    instance_id: instance_id.to_string(),
                    status: instance.status.to_string(),
                });
            }

            let prior = instance.status;
            instance.status = InstanceStatus::Cancelled;
            instance.error = reason.map(String::from);
            instance.current_nodes.clear();
            instance.completed_at = Some(Utc::now());

            if self.store.save_instance(&mut instance, prior)? {
                let cancelled = self.store.cancel_pending_approvals(instance_id, None)?;
                info!(instance_id, approvals_cancelled = cancelled, "Workflow instance cancelled");
                return Ok(instance);
            }

            // A traversal moved the row on; re-read and retry.
            tokio::task::yield_now().await;
        }
    }

    /// Start a new instance on the same pinned version with the original
    /// trigger payload. The old instance is left untouched.
    pub async fn restart_workflow(&self, instance_id: &str) -> Result<ExecutionReport> {
        let old = self.get_instance(instance_id)?;
        let version = self.version_of(&old)?;
        self.launch(version, old.trigger_payload, Some(old.id)).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance> {
        self.store
            .get_instance(instance_id)?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.to_string()))
    }

    pub fn list_instances(&self, status: Option<InstanceStatus>) -> Result<Vec<WorkflowInstance>> {
        self.store.list_instances(status)
    }

    /// Log rows of an instance in traversal order.
    pub fn execution_log(&self, instance_id: &str) -> Result<Vec<ExecutionLog>> {
        self.get_instance(instance_id)?;
        self.store.list_logs(instance_id)
    }

    pub fn get_approval(&self, approval_id: &str) -> Result<WorkflowApproval> {
        self.store
            .get_approval(approval_id)?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))
    }

    pub fn approvals_for(&self, instance_id: &str) -> Result<Vec<WorkflowApproval>> {
        self.store.list_approvals(instance_id)
    }

    /// Pending approvals `voter_id` may vote on now: listed as an approver
    /// (or no list given), not yet voted, and in turn for sequential gates.
    pub fn pending_approvals_for(&self, voter_id: &str) -> Result<Vec<WorkflowApproval>> {
        let mut eligible = Vec::new();
        for approval in self.store.pending_approvals()? {
            let settings = ApprovalSettings::from_approval(&approval)?;
            if !settings.approvers.is_empty() && !settings.approvers.iter().any(|a| a == voter_id) {
                continue;
            }
            if !settings.allow_parallel && settings.expected_voter(approval.votes_cast()) != Some(voter_id) {
                continue;
            }
            let voted = self
                .store
                .list_votes(&approval.id)?
                .iter()
                .any(|v| v.voter_id == voter_id);
            if !voted {
                eligible.push(approval);
            }
        }
        Ok(eligible)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Traversal
    // ─────────────────────────────────────────────────────────────────────

    /// Run `frontier` (and everything it leads to) until every branch ended
    /// or suspended. `instance.current_nodes` holds the other suspended
    /// branches on entry.
    async fn drive(
        &self,
        mut instance: WorkflowInstance,
        graph: &WorkflowGraph,
        frontier: Vec<String>,
    ) -> Result<ExecutionReport> {
        let mut queue: VecDeque<String> = frontier.into();
        let mut suspended: BTreeSet<String> = std::mem::take(&mut instance.current_nodes);
        let mut steps = 0usize;

        while let Some(node_id) = queue.pop_front() {
            steps += 1;
            if steps > self.config.max_steps_per_call {
                let err = WorkflowError::WorkflowCycleDetected {
                    instance_id: instance.id.clone(),
                    limit: self.config.max_steps_per_call,
                };
                self.fail_instance(&mut instance, &node_id, &err)?;
                return Err(err);
            }

            let step = match graph.require_node(&node_id) {
                Ok(node) => self.execute_node(&mut instance, graph, &node_id, node).await,
                Err(e) => Err(e),
            };
            match step {
                Ok(Step::Next(targets)) => queue.extend(targets),
                Ok(Step::Suspend) => {
                    suspended.insert(node_id);
                }
                Ok(Step::End) => {
                    debug!(instance_id = %instance.id, node_id = %node_id, "Branch reached end");
                }
                Err(e) => {
                    self.fail_instance(&mut instance, &node_id, &e)?;
                    return Err(e);
                }
            }

            instance.current_nodes = suspended.iter().chain(queue.iter()).cloned().collect();
            if !self.store.save_instance(&mut instance, InstanceStatus::Running)? {
                return self.interrupted(&instance.id, steps);
            }
        }

        instance.current_nodes = suspended;
        if instance.current_nodes.is_empty() {
            instance.status = InstanceStatus::Completed;
            instance.completed_at = Some(Utc::now());
        } else {
            instance.status = InstanceStatus::Waiting;
        }
        if !self.store.save_instance(&mut instance, InstanceStatus::Running)? {
            return self.interrupted(&instance.id, steps);
        }

        match instance.status {
            InstanceStatus::Completed => info!(instance_id = %instance.id, steps, "Workflow instance completed"),
            _ => info!(
                instance_id = %instance.id,
                steps,
                waiting_at = ?instance.current_nodes,
                "Workflow instance waiting"
            ),
        }

        Ok(ExecutionReport {
            instance_id: instance.id,
            status: instance.status,
            current_nodes: instance.current_nodes,
            steps,
        })
    }

    /// Execute one node and decide where its branch goes next.
    async fn execute_node(
        &self,
        instance: &mut WorkflowInstance,
        graph: &WorkflowGraph,
        node_id: &str,
        node: &NodeSpec,
    ) -> Result<Step> {
        debug!(instance_id = %instance.id, node_id, kind = %node.kind, "Executing node");
        let started = Utc::now();

        match node.kind {
            NodeKind::Trigger => {
                let output = instance.trigger_payload.clone();
                self.write_log(instance, node_id, node.kind, LogStatus::Done, output, None, started)?;
                self.next(instance, graph, node_id, node, PortSelection::Default)
            }

            NodeKind::Action => {
                let key = action_key(node_id, node)?;
                let action = self.registry.action(key).ok_or_else(|| {
                    WorkflowError::InvalidGraph(format!("action '{}' is not registered", key))
                })?;
                let params = self.node_params(instance, node_id, node, started)?;
                if let Err(problems) = action.schema().validate(&params) {
                    return Err(self.action_failed(instance, node_id, node, key, problems, Value::Null, started)?);
                }

                let result = action.execute(&params, &instance.context).await;
                if !result.success {
                    let reason = result.failure_reason();
                    let output = json!({ "code": result.code, "reason": reason });
                    return Err(self.action_failed(instance, node_id, node, key, reason, output, started)?);
                }

                let output = result.data.unwrap_or(Value::Null);
                self.write_log(instance, node_id, node.kind, LogStatus::Done, output.clone(), None, started)?;
                instance.context.insert(node_id.to_string(), output);
                self.next(instance, graph, node_id, node, PortSelection::Default)
            }

            NodeKind::Condition => {
                let key = action_key(node_id, node)?;
                let condition = self.registry.condition(key).ok_or_else(|| {
                    WorkflowError::InvalidGraph(format!("condition '{}' is not registered", key))
                })?;
                let params = self.node_params(instance, node_id, node, started)?;
                if let Err(problems) = condition.schema().validate(&params) {
                    return Err(self.action_failed(instance, node_id, node, key, problems, Value::Null, started)?);
                }

                let result = condition.evaluate(&params, &instance.context).await;
                if !result.success {
                    let reason = result.failure_reason();
                    let output = json!({ "code": result.code, "reason": reason });
                    return Err(self.action_failed(instance, node_id, node, key, reason, output, started)?);
                }

                let output = result.data.unwrap_or(Value::Null);
                let Some(port) = port_of(&output) else {
                    let reason = "condition returned no result".to_string();
                    return Err(self.action_failed(instance, node_id, node, key, reason, output, started)?);
                };
                self.write_log(instance, node_id, node.kind, LogStatus::Done, output.clone(), None, started)?;
                instance.context.insert(node_id.to_string(), output);
                self.next(instance, graph, node_id, node, PortSelection::Exact(&port))
            }

            NodeKind::Approval => {
                if let Some(existing) = self.store.pending_approval(&instance.id, node_id)? {
                    debug!(approval_id = %existing.id, node_id, "Reusing pending approval");
                    return Ok(Step::Suspend);
                }

                let params = self.node_params(instance, node_id, node, started)?;
                let settings = ApprovalSettings::from_params(&params, started).map_err(|e| {
                    WorkflowError::InvalidGraph(format!("approval node '{}': {}", node_id, e))
                })?;

                let log = ExecutionLog {
                    id: Uuid::new_v4().to_string(),
                    instance_id: instance.id.clone(),
                    node_id: node_id.to_string(),
                    node_type: node.kind,
                    status: LogStatus::Waiting,
                    output: Value::Null,
                    error: None,
                    resume_at: None,
                    started_at: started,
                    finished_at: None,
                };
                let approval = WorkflowApproval {
                    id: Uuid::new_v4().to_string(),
                    instance_id: instance.id.clone(),
                    node_id: node_id.to_string(),
                    execution_log_id: log.id.clone(),
                    approver_type: settings.approver_type.clone(),
                    approver_config: serde_json::to_value(&settings)?,
                    required_count: settings.required_count,
                    approved_count: 0,
                    rejected_count: 0,
                    status: ApprovalStatus::Pending,
                    allow_parallel: settings.allow_parallel,
                    deadline: settings.deadline,
                    created_at: started,
                    resolved_at: None,
                };
                self.store.open_approval(&log, &approval)?;

                info!(
                    instance_id = %instance.id,
                    node_id,
                    approval_id = %approval.id,
                    required = approval.required_count,
                    "Approval gate opened"
                );
                Ok(Step::Suspend)
            }

            NodeKind::Wait => {
                if self.store.waiting_log(&instance.id, node_id)?.is_some() {
                    return Ok(Step::Suspend);
                }

                let params = self.node_params(instance, node_id, node, started)?;
                let resume_at = wait_until(&params, started).map_err(|e| {
                    WorkflowError::InvalidGraph(format!("wait node '{}': {}", node_id, e))
                })?;
                let log = ExecutionLog {
                    id: Uuid::new_v4().to_string(),
                    instance_id: instance.id.clone(),
                    node_id: node_id.to_string(),
                    node_type: node.kind,
                    status: LogStatus::Waiting,
                    output: Value::Object(params),
                    error: None,
                    resume_at,
                    started_at: started,
                    finished_at: None,
                };
                self.store.insert_log(&log)?;
                debug!(instance_id = %instance.id, node_id, ?resume_at, "Waiting");
                Ok(Step::Suspend)
            }

            NodeKind::End => Ok(Step::End),
        }
    }

    /// Resolve a node's parameter templates; an unresolvable template is
    /// logged against the node before the error propagates.
    fn node_params(
        &self,
        instance: &WorkflowInstance,
        node_id: &str,
        node: &NodeSpec,
        started: DateTime<Utc>,
    ) -> Result<Map<String, Value>> {
        match resolve_params(&node.params, &instance.context) {
            Ok(params) => Ok(params),
            Err(e) => {
                self.write_log(
                    instance,
                    node_id,
                    node.kind,
                    LogStatus::Failed,
                    Value::Null,
                    Some(e.to_string()),
                    started,
                )?;
                Err(e)
            }
        }
    }

    /// Choose the next targets of a node, failing when nothing matches.
    fn next(
        &self,
        instance: &WorkflowInstance,
        graph: &WorkflowGraph,
        node_id: &str,
        node: &NodeSpec,
        selection: PortSelection<'_>,
    ) -> Result<Step> {
        let edges = graph.select_edges(node, selection);
        if edges.is_empty() {
            return Err(WorkflowError::NoMatchingEdge {
                instance_id: instance.id.clone(),
                node_id: node_id.to_string(),
                port: selection.describe(),
            });
        }
        Ok(Step::Next(edges.into_iter().map(|e| e.target.clone()).collect()))
    }

    /// Log a failed action/condition and build the matching error.
    #[allow(clippy::too_many_arguments)]
    fn action_failed(
        &self,
        instance: &WorkflowInstance,
        node_id: &str,
        node: &NodeSpec,
        key: &str,
        reason: String,
        output: Value,
        started: DateTime<Utc>,
    ) -> Result<WorkflowError> {
        self.write_log(
            instance,
            node_id,
            node.kind,
            LogStatus::Failed,
            output,
            Some(reason.clone()),
            started,
        )?;
        Ok(WorkflowError::ActionExecutionFailed {
            instance_id: instance.id.clone(),
            node_id: node_id.to_string(),
            action: key.to_string(),
            reason,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_log(
        &self,
        instance: &WorkflowInstance,
        node_id: &str,
        kind: NodeKind,
        status: LogStatus,
        output: Value,
        error: Option<String>,
        started: DateTime<Utc>,
    ) -> Result<()> {
        self.store.insert_log(&ExecutionLog {
            id: Uuid::new_v4().to_string(),
            instance_id: instance.id.clone(),
            node_id: node_id.to_string(),
            node_type: kind,
            status,
            output,
            error,
            resume_at: None,
            started_at: started,
            finished_at: Some(Utc::now()),
        })
    }

    /// Persist an instance as failed at `node_id`.
    fn fail_instance(&self, instance: &mut WorkflowInstance, node_id: &str, err: &WorkflowError) -> Result<()> {
        error!(
            instance_id = %instance.id,
            node_id,
            code = err.code(),
            error = %err,
            "Workflow instance failed"
        );

        instance.status = InstanceStatus::Failed;
        instance.error = Some(err.to_string());
        instance.current_nodes = BTreeSet::from([node_id.to_string()]);
        instance.completed_at = Some(Utc::now());
        instance.context.insert(
            ERROR_KEY.to_string(),
            json!({ "code": err.code(), "message": err.to_string(), "node_id": node_id }),
        );

        if !self.store.save_instance(instance, InstanceStatus::Running)? {
            warn!(instance_id = %instance.id, "Instance changed before failure could be recorded");
        }
        Ok(())
    }

    /// Traversal found the row moved on underneath it (cancellation).
    fn interrupted(&self, instance_id: &str, steps: usize) -> Result<ExecutionReport> {
        let current = self.get_instance(instance_id)?;
        warn!(instance_id, status = %current.status, "Traversal interrupted");
        Ok(ExecutionReport {
            instance_id: current.id,
            status: current.status,
            current_nodes: current.current_nodes,
            steps,
        })
    }

    fn version_of(&self, instance: &WorkflowInstance) -> Result<WorkflowVersion> {
        self.store
            .get_version(&instance.version_id)?
            .ok_or_else(|| WorkflowError::VersionNotFound(instance.version_id.clone()))
    }
}

fn stale(instance_id: &str, reason: StaleReason) -> ResumeOutcome {
    ResumeOutcome::Stale {
        instance_id: instance_id.to_string(),
        reason,
    }
}

fn action_key<'a>(node_id: &str, node: &'a NodeSpec) -> Result<&'a str> {
    node.action.as_deref().ok_or_else(|| {
        WorkflowError::InvalidGraph(format!("{} node '{}' names no key", node.kind, node_id))
    })
}

/// Port selected by a condition payload.
fn port_of(output: &Value) -> Option<String> {
    let value = match output {
        Value::Object(map) => map.get("result")?,
        other => other,
    };
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// When a wait node becomes due: `duration_secs`, `until`, or never (an
/// `event` wait only ends on a resume signal).
fn wait_until(params: &Map<String, Value>, now: DateTime<Utc>) -> std::result::Result<Option<DateTime<Utc>>, String> {
    if let Some(secs) = params.get("duration_secs").filter(|v| !v.is_null()) {
        let secs = param_u64(secs)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| format!("duration_secs must be a non-negative integer, got {}", secs))?;
        return Ok(Some(now + Duration::seconds(secs)));
    }
    if let Some(until) = params.get("until").filter(|v| !v.is_null()) {
        return param_datetime(until).map(Some);
    }
    if params.contains_key("event") {
        return Ok(None);
    }
    Err("needs one of duration_secs, until or event".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_port_of_bool_and_string() {
        assert_eq!(port_of(&json!({"result": true})).as_deref(), Some("true"));
        assert_eq!(port_of(&json!({"result": "kingdom"})).as_deref(), Some("kingdom"));
        assert_eq!(port_of(&json!(false)).as_deref(), Some("false"));
        assert_eq!(port_of(&json!({"result": 3})).as_deref(), Some("3"));
        assert!(port_of(&json!({"other": 1})).is_none());
        assert!(port_of(&Value::Null).is_none());
    }

    #[test]
    fn test_wait_until_duration() {
        let now = Utc::now();
        let due = wait_until(&params(json!({"duration_secs": 60})), now).unwrap();
        assert_eq!(due, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_wait_until_event_has_no_deadline() {
        assert_eq!(
            wait_until(&params(json!({"event": "payment"})), Utc::now()).unwrap(),
            None
        );
    }

    #[test]
    fn test_wait_until_requires_a_mode() {
        assert!(wait_until(&Map::new(), Utc::now()).is_err());
        assert!(wait_until(&params(json!({"until": "tomorrow"})), Utc::now()).is_err());
    }

    #[test]
    fn test_engine_config_from_section() {
        let config = EngineConfig::from(&EngineSection {
            max_steps_per_call: 12,
        });
        assert_eq!(config.max_steps_per_call, 12);
        assert_eq!(EngineConfig::default().max_steps_per_call, 500);
    }

    #[test]
    fn test_resume_outcome_serializes_tagged() {
        let outcome = stale("i-1", StaleReason::NodeMismatch);
        assert!(outcome.is_stale());
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "stale");
        assert_eq!(value["reason"], "node_mismatch");
    }
}
