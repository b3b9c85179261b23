//! CLI command handlers.

pub mod approvals;
pub mod definition;
pub mod instance;
pub mod lifecycle;
pub mod registry;
pub mod sweep;
pub mod vote;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use console::{Style, style};
use serde::Serialize;
use serde_json::Value;

use kmp_config::KmpConfig;
use kmp_workflow::{
    ApprovalAggregator, DefinitionService, EngineConfig, Registry, ServiceResult, WorkflowEngine,
    WorkflowStore,
};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: KmpConfig,
    /// `--db` override.
    pub db_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Engine services wired over one store.
pub struct Services {
    pub engine: Arc<WorkflowEngine>,
    pub definitions: DefinitionService,
    pub aggregator: ApprovalAggregator,
}

impl Context {
    /// Open the database and wire the engine.
    pub fn services(&self) -> Result<Services> {
        let mut database = self.config.database();
        if let Some(ref path) = self.db_path {
            database.path = Some(path.clone());
        }
        let store = Arc::new(WorkflowStore::open_with(&database).with_context(|| {
            format!("Failed to open database {}", database.resolved_path().display())
        })?);
        let registry = Arc::new(Registry::with_core()?);

        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            registry.clone(),
            EngineConfig::from(&self.config.engine()),
        ));
        Ok(Services {
            definitions: DefinitionService::new(store, registry),
            aggregator: ApprovalAggregator::new(engine.clone()),
            engine,
        })
    }

    /// Print an operation result.
    ///
    /// JSON mode prints the `ServiceResult` envelope; human mode hands the
    /// value to `human`. Failures become the command's error either way.
    pub fn emit<T: Serialize>(
        &self,
        result: kmp_workflow::Result<T>,
        human: impl FnOnce(&T),
    ) -> Result<()> {
        if self.json_output {
            let envelope: ServiceResult<T> = result.into();
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            if envelope.success {
                return Ok(());
            }
            return Err(anyhow!(envelope.failure_reason()));
        }
        let value = result?;
        human(&value);
        Ok(())
    }
}

/// Parse a `--payload`/`--data` argument.
pub fn parse_json_arg(name: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("--{} is not valid JSON", name))
}

pub fn heading(title: &str) {
    println!("{}", style(title).bold());
    println!("{}", Style::new().dim().apply_to("─".repeat(50)));
}

pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<14} {}", format!("{}:", label), style(value).cyan());
}

pub fn dim(text: impl std::fmt::Display) -> String {
    Style::new().dim().apply_to(text).to_string()
}
