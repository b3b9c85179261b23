//! Action/condition registry.
//!
//! Modules contribute capabilities at process start by registering them
//! explicitly, in a defined order (the `core` module first). The engine only
//! ever looks capabilities up by key.
//!
//! # Example
//!
//! ```rust,ignore
//! use kmp_workflow::{Action, ParamSchema, Registry, ServiceResult, WorkflowContext};
//!
//! struct GrantRole;
//!
//! #[async_trait]
//! impl Action for GrantRole {
//!     fn key(&self) -> &str { "officers.grant_role" }
//!     fn label(&self) -> &str { "Grant role" }
//!     async fn execute(&self, params: &Map<String, Value>, ctx: &WorkflowContext) -> ServiceResult {
//!         ServiceResult::ok(json!({"granted": true}))
//!     }
//! }
//!
//! let mut registry = Registry::with_core()?;
//! registry.register_action(GrantRole)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::builtin::CoreModule;
use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::result::ServiceResult;

// ─────────────────────────────────────────────────────────────────────────────
// Parameter schema
// ─────────────────────────────────────────────────────────────────────────────

/// JSON type a parameter must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Anything, including null.
    Any,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Allowed values, if the parameter is an enumeration.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn required(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: true,
            description: description.into(),
            allowed: None,
        }
    }

    pub fn optional(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: false,
            description: description.into(),
            allowed: None,
        }
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }
}

/// Parameter schema of an action or condition: name to spec.
///
/// Used to validate resolved parameters before invocation and by designer
/// tooling to render forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSchema {
    pub params: BTreeMap<String, ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Check resolved parameters against the schema.
    ///
    /// Unknown parameters are allowed; they are passed through untouched.
    pub fn validate(&self, params: &Map<String, Value>) -> std::result::Result<(), String> {
        let mut problems = Vec::new();

        for (name, spec) in &self.params {
            match params.get(name) {
                None | Some(Value::Null) if spec.required => {
                    problems.push(format!("missing required parameter '{}'", name));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !spec.param_type.accepts(value) {
                        problems.push(format!(
                            "parameter '{}' must be {}",
                            name,
                            spec.param_type.name()
                        ));
                    } else if let Some(ref allowed) = spec.allowed
                        && !allowed.contains(value)
                    {
                        problems.push(format!("parameter '{}' has invalid value {}", name, value));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability traits
// ─────────────────────────────────────────────────────────────────────────────

/// An executable step contributed by a module.
///
/// Expected failures are reported through [`ServiceResult::fail`]; the
/// engine marks the instance failed and never retries.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique registry key, e.g. `officers.grant_role`.
    fn key(&self) -> &str;

    fn label(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    /// Informational only: the engine always awaits the result.
    fn is_async(&self) -> bool {
        false
    }

    async fn execute(&self, params: &Map<String, Value>, ctx: &WorkflowContext) -> ServiceResult;
}

/// A branching predicate.
///
/// The payload's `result` field selects the output port: booleans map to
/// `"true"`/`"false"`, strings and numbers are used as-is.
#[async_trait]
pub trait Condition: Send + Sync {
    fn key(&self) -> &str;

    fn label(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn evaluate(&self, params: &Map<String, Value>, ctx: &WorkflowContext) -> ServiceResult;
}

/// A field of an entity type exposed to designer tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityField {
    pub name: String,
    pub field_type: ParamType,
}

impl EntityField {
    pub fn new(name: impl Into<String>, field_type: ParamType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A persisted record type workflows may bind to. Not used by traversal.
pub trait EntityType: Send + Sync {
    fn key(&self) -> &str;
    fn label(&self) -> &str;
    fn fields(&self) -> Vec<EntityField>;
}

/// A unit of registration, e.g. one plugin's capabilities.
pub trait WorkflowModule {
    fn name(&self) -> &str;
    fn register(&self, registry: &mut Registry) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of one registered capability, for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub kind: String,
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamSpec>,
}

/// Lookup table of actions, conditions and entity types.
#[derive(Default)]
pub struct Registry {
    actions: BTreeMap<String, Arc<dyn Action>>,
    conditions: BTreeMap<String, Arc<dyn Condition>>,
    entities: BTreeMap<String, Arc<dyn EntityType>>,
    modules: Vec<String>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `core` module already registered.
    pub fn with_core() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_module(&CoreModule)?;
        Ok(registry)
    }

    /// Run a module's registration. Modules are recorded in call order.
    pub fn register_module(&mut self, module: &dyn WorkflowModule) -> Result<()> {
        if self.modules.iter().any(|m| m == module.name()) {
            return Err(WorkflowError::Registry(format!(
                "module '{}' already registered",
                module.name()
            )));
        }
        module.register(self)?;
        self.modules.push(module.name().to_string());
        debug!(module = module.name(), "registered workflow module");
        Ok(())
    }

    /// Register an action. Keys are unique across actions.
    pub fn register_action<A: Action + 'static>(&mut self, action: A) -> Result<()> {
        self.register_action_arc(Arc::new(action))
    }

    pub fn register_action_arc(&mut self, action: Arc<dyn Action>) -> Result<()> {
        let key = action.key().to_string();
        if self.actions.contains_key(&key) {
            return Err(WorkflowError::Registry(format!(
                "action '{}' already registered",
                key
            )));
        }
        self.actions.insert(key, action);
        Ok(())
    }

    /// Register a condition. Keys are unique across conditions.
    pub fn register_condition<C: Condition + 'static>(&mut self, condition: C) -> Result<()> {
        self.register_condition_arc(Arc::new(condition))
    }

    pub fn register_condition_arc(&mut self, condition: Arc<dyn Condition>) -> Result<()> {
        let key = condition.key().to_string();
        if self.conditions.contains_key(&key) {
            return Err(WorkflowError::Registry(format!(
                "condition '{}' already registered",
                key
            )));
        }
        self.conditions.insert(key, condition);
        Ok(())
    }

    pub fn register_entity<E: EntityType + 'static>(&mut self, entity: E) -> Result<()> {
        let key = entity.key().to_string();
        if self.entities.contains_key(&key) {
            return Err(WorkflowError::Registry(format!(
                "entity type '{}' already registered",
                key
            )));
        }
        self.entities.insert(key, Arc::new(entity));
        Ok(())
    }

    pub fn action(&self, key: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(key).cloned()
    }

    pub fn condition(&self, key: &str) -> Option<Arc<dyn Condition>> {
        self.conditions.get(key).cloned()
    }

    pub fn entity(&self, key: &str) -> Option<Arc<dyn EntityType>> {
        self.entities.get(key).cloned()
    }

    /// Registered module names in initialization order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn action_keys(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    pub fn condition_keys(&self) -> Vec<&str> {
        self.conditions.keys().map(|s| s.as_str()).collect()
    }

    /// Everything registered, actions first, for listing and designer tooling.
    pub fn describe(&self) -> Vec<CapabilityInfo> {
        let actions = self.actions.values().map(|a| CapabilityInfo {
            kind: "action".into(),
            key: a.key().to_string(),
            label: a.label().to_string(),
            description: a.description().to_string(),
            is_async: a.is_async(),
            params: a.schema().params,
        });
        let conditions = self.conditions.values().map(|c| CapabilityInfo {
            kind: "condition".into(),
            key: c.key().to_string(),
            label: c.label().to_string(),
            description: c.description().to_string(),
            is_async: false,
            params: c.schema().params,
        });
        let entities = self.entities.values().map(|e| CapabilityInfo {
            kind: "entity".into(),
            key: e.key().to_string(),
            label: e.label().to_string(),
            description: String::new(),
            is_async: false,
            params: e
                .fields()
                .into_iter()
                .map(|f| (f.name, ParamSpec::optional(f.field_type, "")))
                .collect(),
        });
        actions.chain(conditions).chain(entities).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.action_keys())
            .field("conditions", &self.condition_keys())
            .field("modules", &self.modules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Action for Noop {
        fn key(&self) -> &str {
            "test.noop"
        }
        fn label(&self) -> &str {
            "No-op"
        }
        fn schema(&self) -> ParamSchema {
            ParamSchema::new()
                .param("member_id", ParamSpec::required(ParamType::Integer, "Member"))
                .param(
                    "mode",
                    ParamSpec::optional(ParamType::String, "Mode")
                        .one_of(vec![json!("fast"), json!("slow")]),
                )
        }
        async fn execute(&self, _params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
            ServiceResult::ok_empty()
        }
    }

    struct Branch;

    impl EntityType for Branch {
        fn key(&self) -> &str {
            "branches"
        }
        fn label(&self) -> &str {
            "Branch"
        }
        fn fields(&self) -> Vec<EntityField> {
            vec![EntityField::new("name", ParamType::String)]
        }
    }

    struct Plugin;

    impl WorkflowModule for Plugin {
        fn name(&self) -> &str {
            "test"
        }
        fn register(&self, registry: &mut Registry) -> Result<()> {
            registry.register_action(Noop)?;
            registry.register_entity(Branch)
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_with_core_registers_builtins_first() {
        let registry = Registry::with_core().unwrap();
        assert_eq!(registry.modules(), &["core".to_string()]);
        assert!(registry.action("core.set").is_some());
        assert!(registry.action("core.log").is_some());
        assert!(registry.condition("core.compare").is_some());
        assert!(registry.condition("core.switch").is_some());
    }

    #[test]
    fn test_module_order_recorded() {
        let mut registry = Registry::with_core().unwrap();
        registry.register_module(&Plugin).unwrap();
        assert_eq!(registry.modules(), &["core".to_string(), "test".to_string()]);
        assert!(registry.action("test.noop").is_some());
        assert!(registry.entity("branches").is_some());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = Registry::new();
        registry.register_action(Noop).unwrap();
        let err = registry.register_action(Noop).unwrap_err();
        assert!(matches!(err, WorkflowError::Registry(_)));
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let mut registry = Registry::new();
        registry.register_module(&Plugin).unwrap();
        assert!(registry.register_module(&Plugin).is_err());
    }

    #[test]
    fn test_unknown_key_is_none() {
        let registry = Registry::new();
        assert!(registry.action("nope").is_none());
        assert!(registry.condition("nope").is_none());
    }

    #[test]
    fn test_schema_requires_parameter() {
        let err = Noop.schema().validate(&params(json!({}))).unwrap_err();
        assert!(err.contains("missing required parameter 'member_id'"));
    }

    #[test]
    fn test_schema_checks_type_and_enum() {
        let schema = Noop.schema();
        assert!(schema.validate(&params(json!({"member_id": 7}))).is_ok());
        assert!(
            schema
                .validate(&params(json!({"member_id": "seven"})))
                .unwrap_err()
                .contains("must be integer")
        );
        assert!(
            schema
                .validate(&params(json!({"member_id": 7, "mode": "medium"})))
                .unwrap_err()
                .contains("invalid value")
        );
    }

    #[test]
    fn test_schema_serializes_enum_keyword() {
        let text = serde_json::to_value(Noop.schema()).unwrap();
        assert_eq!(text["mode"]["enum"], json!(["fast", "slow"]));
        assert_eq!(text["member_id"]["type"], json!("integer"));
    }

    #[test]
    fn test_describe_lists_all_kinds() {
        let mut registry = Registry::with_core().unwrap();
        registry.register_module(&Plugin).unwrap();
        let info = registry.describe();
        assert!(info.iter().any(|c| c.kind == "action" && c.key == "test.noop"));
        assert!(info.iter().any(|c| c.kind == "condition" && c.key == "core.compare"));
        assert!(info.iter().any(|c| c.kind == "entity" && c.key == "branches"));
    }
}
