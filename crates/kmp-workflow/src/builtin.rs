//! Built-in `core` capabilities.
//!
//! Generic building blocks only; domain behaviour (granting roles, issuing
//! warrants) lives in the modules that register it.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::context::WorkflowContext;
use crate::error::Result;
use crate::registry::{Action, Condition, ParamSchema, ParamSpec, ParamType, Registry, WorkflowModule};
use crate::result::ServiceResult;

/// Registers the `core.*` actions and conditions.
pub struct CoreModule;

impl WorkflowModule for CoreModule {
    fn name(&self) -> &str {
        "core"
    }

    fn register(&self, registry: &mut Registry) -> Result<()> {
        registry.register_action(SetAction)?;
        registry.register_action(LogAction)?;
        registry.register_condition(CompareCondition)?;
        registry.register_condition(SwitchCondition)?;
        Ok(())
    }
}

/// Outputs its resolved parameters unchanged.
pub struct SetAction;

#[async_trait]
impl Action for SetAction {
    fn key(&self) -> &str {
        "core.set"
    }

    fn label(&self) -> &str {
        "Set values"
    }

    fn description(&self) -> &str {
        "Copies its parameters into the node's output"
    }

    async fn execute(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        ServiceResult::ok(Value::Object(params.clone()))
    }
}

/// Emits a tracing event with a message.
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn key(&self) -> &str {
        "core.log"
    }

    fn label(&self) -> &str {
        "Log message"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().param(
            "message",
            ParamSpec::required(ParamType::String, "Text to log"),
        )
    }

    async fn execute(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
        info!(target: "kmp_workflow::core_log", "{}", message);
        ServiceResult::ok(json!({ "message": message }))
    }
}

/// Compares `left` and `right` with `op`; ports `true`/`false`.
pub struct CompareCondition;

const COMPARE_OPS: [&str; 7] = ["eq", "ne", "gt", "gte", "lt", "lte", "contains"];

#[async_trait]
impl Condition for CompareCondition {
    fn key(&self) -> &str {
        "core.compare"
    }

    fn label(&self) -> &str {
        "Compare values"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .param("left", ParamSpec::optional(ParamType::Any, "Left operand"))
            .param("right", ParamSpec::optional(ParamType::Any, "Right operand"))
            .param(
                "op",
                ParamSpec::optional(ParamType::String, "Comparison operator (default eq)")
                    .one_of(COMPARE_OPS.iter().map(|op| json!(op)).collect()),
            )
    }

    async fn evaluate(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        let left = params.get("left").unwrap_or(&Value::Null);
        let right = params.get("right").unwrap_or(&Value::Null);
        let op = params.get("op").and_then(Value::as_str).unwrap_or("eq");

        match compare(left, right, op) {
            Some(result) => ServiceResult::ok(json!({ "result": result })),
            None => ServiceResult::fail_with_code(
                "InvalidComparison",
                format!("cannot apply '{}' to {} and {}", op, left, right),
            ),
        }
    }
}

fn compare(left: &Value, right: &Value, op: &str) -> Option<bool> {
    match op {
        "eq" => Some(loose_eq(left, right)),
        "ne" => Some(!loose_eq(left, right)),
        "gt" | "gte" | "lt" | "lte" => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => left.as_f64()?.partial_cmp(&right.as_f64()?)?,
            };
            Some(match op {
                "gt" => ordering.is_gt(),
                "gte" => ordering.is_ge(),
                "lt" => ordering.is_lt(),
                _ => ordering.is_le(),
            })
        }
        "contains" => match left {
            Value::Array(items) => Some(items.iter().any(|i| loose_eq(i, right))),
            Value::String(s) => Some(s.contains(right.as_str()?)),
            Value::Object(map) => Some(map.contains_key(right.as_str()?)),
            _ => None,
        },
        _ => None,
    }
}

/// Numbers compare by value so `1` equals `1.0`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Returns the resolved `value` as the port.
pub struct SwitchCondition;

#[async_trait]
impl Condition for SwitchCondition {
    fn key(&self) -> &str {
        "core.switch"
    }

    fn label(&self) -> &str {
        "Switch on value"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().param(
            "value",
            ParamSpec::required(ParamType::Any, "Value whose text names the port"),
        )
    }

    async fn evaluate(&self, params: &Map<String, Value>, _ctx: &WorkflowContext) -> ServiceResult {
        match params.get("value") {
            Some(value @ (Value::String(_) | Value::Bool(_) | Value::Number(_))) => {
                ServiceResult::ok(json!({ "result": value }))
            }
            Some(other) => ServiceResult::fail(format!("cannot switch on {}", other)),
            None => ServiceResult::fail("missing 'value'"),
        }
    }
}
