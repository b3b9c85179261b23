//! Shared fixtures for workflow integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;

use kmp_workflow::{
    Action, ApprovalAggregator, DefinitionService, EngineConfig, ParamSchema, ParamSpec, ParamType,
    Registry, ServiceResult, WorkflowContext, WorkflowEngine, WorkflowGraph, WorkflowStore,
};

/// Records every call it receives and echoes its params.
#[derive(Default)]
pub struct RecordingAction {
    pub calls: Mutex<Vec<Map<String, Value>>>,
}

impl RecordingAction {
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn key(&self) -> &str {
        "test.record"
    }

    fn label(&self) -> &str {
        "Record call"
    }

    async fn execute(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        self.calls.lock().push(params.clone());
        ServiceResult::ok(json!({ "recorded": true, "params": params }))
    }
}

/// Always reports failure.
pub struct FailingAction;

#[async_trait]
impl Action for FailingAction {
    fn key(&self) -> &str {
        "test.fail"
    }

    fn label(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        ServiceResult::fail_with_code("OfficeVacant", "no officer holds the office")
    }
}

/// Requires a `member_id` integer.
pub struct StrictAction;

#[async_trait]
impl Action for StrictAction {
    fn key(&self) -> &str {
        "test.strict"
    }

    fn label(&self) -> &str {
        "Strict params"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().param("member_id", ParamSpec::required(ParamType::Integer, "Member"))
    }

    async fn execute(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        ServiceResult::ok(Value::Object(params.clone()))
    }
}

/// Parks inside `execute` until released, so a test can act while a
/// branch is mid-traversal.
#[derive(Default)]
pub struct BlockingAction {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl Action for BlockingAction {
    fn key(&self) -> &str {
        "test.block"
    }

    fn label(&self) -> &str {
        "Block until released"
    }

    async fn execute(&self, _params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        self.entered.notify_one();
        self.release.notified().await;
        ServiceResult::ok(json!({ "released": true }))
    }
}

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub definitions: DefinitionService,
    pub aggregator: ApprovalAggregator,
    pub recorder: Arc<RecordingAction>,
    pub blocker: Arc<BlockingAction>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let recorder = Arc::new(RecordingAction::default());
        let blocker = Arc::new(BlockingAction::default());
        let mut registry = Registry::with_core().unwrap();
        registry.register_action_arc(recorder.clone()).unwrap();
        registry.register_action_arc(blocker.clone()).unwrap();
        registry.register_action(FailingAction).unwrap();
        registry.register_action(StrictAction).unwrap();
        let registry = Arc::new(registry);

        let store = Arc::new(WorkflowStore::open_in_memory().unwrap());
        let engine = Arc::new(WorkflowEngine::new(store.clone(), registry.clone(), config));
        Self {
            definitions: DefinitionService::new(store, registry),
            aggregator: ApprovalAggregator::new(engine.clone()),
            engine,
            recorder,
            blocker,
        }
    }

    /// Create `slug` and publish `graph` as its first version.
    pub fn publish(&self, slug: &str, graph: WorkflowGraph) {
        let definition = self
            .definitions
            .create_definition(slug, slug, "manual", "")
            .unwrap();
        let version = self.definitions.create_version(&definition.id, &graph).unwrap();
        self.definitions.publish_version(&version.id).unwrap();
    }
}
