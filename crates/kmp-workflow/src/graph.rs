//! Workflow graph model and validation.
//!
//! A version's graph maps node ids to node specs. Each node names its type,
//! the action/condition key it invokes (if any), templated parameters, and an
//! ordered list of outgoing edges labelled with output ports.
//!
//! # Example TOML
//!
//! ```toml
//! [definition]
//! slug = "officer-hire"
//! name = "Officer hire"
//! trigger_type = "manual"
//!
//! [nodes.start]
//! type = "trigger"
//! edges = [{ target = "check_warrant" }]
//!
//! [nodes.check_warrant]
//! type = "condition"
//! action = "core.compare"
//! params = { left = "{{context.warrant_active}}", op = "eq", right = true }
//! edges = [
//!     { target = "approve", port = "true" },
//!     { target = "denied", port = "false" },
//! ]
//!
//! [nodes.approve]
//! type = "approval"
//! params = { approvers = ["seneschal"], required_count = 1, deadline_secs = 604800 }
//! edges = [
//!     { target = "done", port = "approved" },
//!     { target = "denied", port = "rejected" },
//!     { target = "denied", port = "expired" },
//! ]
//!
//! [nodes.done]
//! type = "end"
//!
//! [nodes.denied]
//! type = "end"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::approval::ApprovalSettings;
use crate::error::WorkflowError;
use crate::registry::Registry;

/// Port followed when an approval gate is approved.
pub const PORT_APPROVED: &str = "approved";
/// Port followed when an approval gate is rejected.
pub const PORT_REJECTED: &str = "rejected";
/// Reserved port followed when the deadline sweep expires an approval.
pub const PORT_EXPIRED: &str = "expired";
/// Port followed when a timer wait elapses.
pub const PORT_ELAPSED: &str = "elapsed";
/// Label treated the same as an unlabelled edge.
pub const PORT_DEFAULT: &str = "default";

/// The kind of step a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Approval,
    Wait,
    End,
}

string_enum!(NodeKind {
    Trigger => "trigger",
    Action => "action",
    Condition => "condition",
    Approval => "approval",
    Wait => "wait",
    End => "end",
});

impl NodeKind {
    /// Approval and wait nodes suspend traversal.
    pub fn is_suspend_point(&self) -> bool {
        matches!(self, Self::Approval | Self::Wait)
    }
}

/// An outgoing edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Target node id.
    pub target: String,
    /// Output port label; `None` (or `"default"`) is the default edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl Edge {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port: None,
        }
    }

    pub fn on(port: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port: Some(port.into()),
        }
    }

    /// Whether this is an unlabelled/default edge.
    pub fn is_default(&self) -> bool {
        match self.port.as_deref() {
            None => true,
            Some(p) => p == PORT_DEFAULT,
        }
    }

    fn matches(&self, port: &str) -> bool {
        self.port.as_deref() == Some(port)
    }
}

/// A single node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Display label for designer tooling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Registered action or condition key.
    #[serde(default, alias = "condition", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Parameter bindings; string values may contain `{{...}}` templates.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Ordered outgoing edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,

    /// Port an action node follows instead of its default edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<String>,
}

impl NodeSpec {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            label: None,
            action: None,
            params: Map::new(),
            edges: Vec::new(),
            default_port: None,
        }
    }

    pub fn with_action(mut self, key: impl Into<String>) -> Self {
        self.action = Some(key.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_default_port(mut self, port: impl Into<String>) -> Self {
        self.default_port = Some(port.into());
        self
    }
}

/// How the next edge(s) out of a node are chosen.
#[derive(Debug, Clone, Copy)]
pub enum PortSelection<'a> {
    /// Trigger/action nodes: the node's `default_port` if set, otherwise every
    /// default edge (fan-out), otherwise the only edge.
    Default,
    /// Condition nodes: edges labelled exactly with the port.
    Exact(&'a str),
    /// Resume signals: edges labelled with the port, falling back to a single
    /// default edge. The reserved `expired` port never falls back.
    Resume(&'a str),
}

impl PortSelection<'_> {
    /// Port label for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Default => PORT_DEFAULT.to_string(),
            Self::Exact(p) | Self::Resume(p) => p.to_string(),
        }
    }
}

/// Immutable node/edge graph of a workflow version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: BTreeMap<String, NodeSpec>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style node insertion.
    pub fn with_node(mut self, id: impl Into<String>, node: NodeSpec) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Look up a node that an edge or the instance position refers to.
    pub fn require_node(&self, id: &str) -> Result<&NodeSpec, WorkflowError> {
        self.nodes
            .get(id)
            .ok_or_else(|| WorkflowError::InvalidGraph(format!("node '{}' does not exist", id)))
    }

    /// The id of the graph's single trigger node.
    pub fn trigger_node(&self) -> Result<&str, WorkflowError> {
        let mut triggers = self
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::Trigger)
            .map(|(id, _)| id.as_str());
        match (triggers.next(), triggers.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => Err(WorkflowError::InvalidGraph("no trigger node".into())),
            (Some(_), Some(_)) => Err(WorkflowError::InvalidGraph(
                "more than one trigger node".into(),
            )),
        }
    }

    /// Choose the outgoing edges of `node` for a port selection.
    ///
    /// Returns an empty vector when nothing matches.
    pub fn select_edges<'g>(&'g self, node: &'g NodeSpec, selection: PortSelection<'_>) -> Vec<&'g Edge> {
        match selection {
            PortSelection::Default => {
                if let Some(ref port) = node.default_port {
                    return node.edges.iter().filter(|e| e.matches(port)).collect();
                }
                let defaults: Vec<&Edge> = node.edges.iter().filter(|e| e.is_default()).collect();
                if defaults.is_empty() && node.edges.len() == 1 {
                    return node.edges.iter().collect();
                }
                defaults
            }
            PortSelection::Exact(port) => node.edges.iter().filter(|e| e.matches(port)).collect(),
            PortSelection::Resume(port) => {
                let matched: Vec<&Edge> = node.edges.iter().filter(|e| e.matches(port)).collect();
                if !matched.is_empty() || port == PORT_EXPIRED {
                    return matched;
                }
                let defaults: Vec<&Edge> = node.edges.iter().filter(|e| e.is_default()).collect();
                if defaults.len() == 1 {
                    defaults
                } else {
                    Vec::new()
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────

    /// Validate the graph structure.
    ///
    /// Checks:
    /// - At least one node, exactly one trigger, at least one end
    /// - Every edge targets an existing node; nothing targets the trigger
    /// - Action and condition nodes name a key
    /// - End nodes have no outgoing edges; every other node has at least one
    /// - Approval nodes without templates carry usable approval settings
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::InvalidGraph("graph has no nodes".into()));
        }

        let trigger = self.trigger_node()?;

        if !self.nodes.values().any(|n| n.kind == NodeKind::End) {
            return Err(WorkflowError::InvalidGraph("graph has no end node".into()));
        }

        for (id, node) in &self.nodes {
            if id.is_empty() {
                return Err(WorkflowError::InvalidGraph("node id cannot be empty".into()));
            }

            match node.kind {
                NodeKind::Action | NodeKind::Condition => {
                    if node.action.as_deref().is_none_or(str::is_empty) {
                        return Err(WorkflowError::InvalidGraph(format!(
                            "{} node '{}' must name an action key",
                            node.kind, id
                        )));
                    }
                }
                NodeKind::Approval if !contains_template(&node.params) => {
                    ApprovalSettings::from_params(&node.params, Utc::now()).map_err(|e| {
                        WorkflowError::InvalidGraph(format!("approval node '{}': {}", id, e))
                    })?;
                }
                NodeKind::End => {
                    if !node.edges.is_empty() {
                        return Err(WorkflowError::InvalidGraph(format!(
                            "end node '{}' cannot have outgoing edges",
                            id
                        )));
                    }
                }
                _ => {}
            }

            if node.kind != NodeKind::End && node.edges.is_empty() {
                return Err(WorkflowError::InvalidGraph(format!(
                    "node '{}' has no outgoing edges",
                    id
                )));
            }

            for edge in &node.edges {
                if !self.nodes.contains_key(&edge.target) {
                    return Err(WorkflowError::InvalidGraph(format!(
                        "node '{}' has an edge to unknown node '{}'",
                        id, edge.target
                    )));
                }
                if edge.target == trigger {
                    return Err(WorkflowError::InvalidGraph(format!(
                        "node '{}' has an edge back to the trigger",
                        id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate against the registered capabilities.
    ///
    /// Every action node must name a registered action and every condition
    /// node a registered condition.
    pub fn validate_against(&self, registry: &Registry) -> Result<(), WorkflowError> {
        self.validate()?;
        for (id, node) in &self.nodes {
            let Some(key) = node.action.as_deref() else {
                continue;
            };
            let known = match node.kind {
                NodeKind::Action => registry.action(key).is_some(),
                NodeKind::Condition => registry.condition(key).is_some(),
                _ => true,
            };
            if !known {
                return Err(WorkflowError::InvalidGraph(format!(
                    "{} node '{}' references unregistered key '{}'",
                    node.kind, id, key
                )));
            }
        }
        Ok(())
    }

    /// Non-fatal findings: synchronous cycles that only the runtime step
    /// ceiling would stop.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for cycle_node in self.synchronous_cycle_nodes() {
            warnings.push(format!(
                "node '{}' is on a cycle with no approval or wait node",
                cycle_node
            ));
        }
        warnings
    }

    /// Nodes that lie on a cycle made only of non-suspending nodes.
    fn synchronous_cycle_nodes(&self) -> Vec<String> {
        // Kahn's algorithm over the non-suspending subgraph; whatever cannot
        // be peeled off sits on (or behind) a cycle.
        let sync_nodes: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.kind.is_suspend_point())
            .map(|(id, _)| id.as_str())
            .collect();
        let in_subgraph: HashSet<&str> = sync_nodes.iter().copied().collect();

        let mut in_degree: HashMap<&str, usize> = sync_nodes.iter().map(|id| (*id, 0)).collect();
        for id in &sync_nodes {
            for edge in &self.nodes[*id].edges {
                if in_subgraph.contains(edge.target.as_str())
                    && let Some(d) = in_degree.get_mut(edge.target.as_str())
                {
                    *d += 1;
                }
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut removed: HashSet<&str> = HashSet::new();

        while let Some(id) = queue.pop() {
            removed.insert(id);
            for edge in &self.nodes[id].edges {
                let target = edge.target.as_str();
                if let Some(d) = in_degree.get_mut(target) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(target);
                    }
                }
            }
        }

        let mut remaining: Vec<String> = sync_nodes
            .into_iter()
            .filter(|id| !removed.contains(id))
            .map(String::from)
            .collect();
        remaining.sort();
        if !remaining.is_empty() {
            debug!(nodes = ?remaining, "synchronous cycle in workflow graph");
        }
        remaining
    }
}

/// Whether any string in `params` holds a `{{...}}` template.
fn contains_template(params: &Map<String, Value>) -> bool {
    fn walk(value: &Value) -> bool {
        match value {
            Value::String(s) => s.contains("{{"),
            Value::Array(items) => items.iter().any(walk),
            Value::Object(map) => map.values().any(walk),
            _ => false,
        }
    }
    params.values().any(walk)
}

// ---------------------------------------------------------------------------
// Graph files
// ---------------------------------------------------------------------------

/// Definition metadata carried by an importable graph file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionHeader {
    pub slug: String,
    pub name: String,
    #[serde(default = "default_trigger_type")]
    pub trigger_type: String,
    #[serde(default)]
    pub description: String,
}

fn default_trigger_type() -> String {
    "manual".to_string()
}

/// An importable workflow file: definition header plus nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub definition: DefinitionHeader,
    pub nodes: BTreeMap<String, NodeSpec>,
}

impl WorkflowFile {
    /// Parse a workflow file from TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self, WorkflowError> {
        toml::from_str(toml_str)
            .map_err(|e| WorkflowError::InvalidGraph(format!("TOML parse error: {}", e)))
    }

    /// Parse a workflow file from JSON.
    pub fn from_json(json_str: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(json_str)
            .map_err(|e| WorkflowError::InvalidGraph(format!("JSON parse error: {}", e)))
    }

    /// Load a workflow file, choosing the format by extension.
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// The graph portion of the file.
    pub fn graph(&self) -> WorkflowGraph {
        WorkflowGraph {
            nodes: self.nodes.clone(),
        }
    }
}
