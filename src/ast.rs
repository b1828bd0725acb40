//! Serde description of an execution node tree
//!
//! Workflow languages are parsed elsewhere; what arrives here is an
//! already-structured tree of nodes, in YAML or JSON:
//!
//! ```yaml
//! name: demo
//! root:
//!   type: function
//!   name: split
//!   functionType: splitType
//!   properties:
//!     - { name: resource, value: "https://example.azurewebsites.net/api/split" }
//!   dataIns:
//!     - { name: text, type: string, source: demo/text }
//!   dataOuts:
//!     - { name: words, type: collection }
//! ```
//!
//! [`WorkflowSpec::build`] validates the tree and turns it into
//! `Arc<dyn Node>`s.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{EnactError, Result};
use crate::node::{
    BoundedLoopNode, BranchArm, BranchNode, Condition, FunctionNode, LoopBounds, Node,
    ParallelNode, SequenceNode,
};

// ═══════════════════════════════════════════
// DECLARATIONS
// ═══════════════════════════════════════════

/// Semantic type of a declared input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    #[default]
    String,
    #[serde(alias = "boolean")]
    Bool,
    Object,
    #[serde(alias = "array")]
    Collection,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Number => "number",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Object => "object",
            DataType::Collection => "collection",
        };
        f.write_str(name)
    }
}

/// `name=value` pair used for properties and constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConstraint {
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
}

impl PropertyConstraint {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Accept `1000` and `true` as well as `"1000"`
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar value, got {}",
            other
        ))),
    }
}

/// Declared input of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIn {
    /// Parameter name sent to the function
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    /// Upstream output key (`<node>/<output>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Literal used when the source key is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Copy into this node's outputs instead of sending it
    #[serde(default)]
    pub passing: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyConstraint>,
}

impl DataIn {
    pub fn from_source(name: impl Into<String>, source: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            source: Some(source.into()),
            value: None,
            passing: false,
            properties: Vec::new(),
        }
    }

    pub fn literal(name: impl Into<String>, value: Value, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            source: None,
            value: Some(value),
            passing: false,
            properties: Vec::new(),
        }
    }

    pub fn passing(mut self) -> Self {
        self.passing = true;
        self
    }

    /// Send to the function and also copy into this node's outputs
    pub fn replicated(mut self) -> Self {
        self.properties.push(PropertyConstraint::new("replicate", "true"));
        self
    }

    pub fn is_replicated(&self) -> bool {
        self.properties
            .iter()
            .any(|p| p.name == "replicate" && p.value.trim().eq_ignore_ascii_case("true"))
    }
}

/// Declared output of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOut {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
}

impl DataOut {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

// ═══════════════════════════════════════════
// NODE TREE
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub name: String,
    /// Defaults to the node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyConstraint>,
    #[serde(default)]
    pub constraints: Vec<PropertyConstraint>,
    #[serde(default)]
    pub data_ins: Vec<DataIn>,
    #[serde(default)]
    pub data_outs: Vec<DataOut>,
    /// Continuations called with this function's outputs
    #[serde(default)]
    pub next: Vec<NodeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<NodeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSpec {
    pub name: String,
    pub branches: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Box<NodeSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub node: NodeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    pub name: String,
    pub arms: Vec<ArmSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Box<NodeSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpec {
    pub name: String,
    #[serde(flatten)]
    pub bounds: LoopBounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,
    pub body: Box<NodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Box<NodeSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeSpec {
    Function(FunctionSpec),
    Sequence(SequenceSpec),
    Parallel(ParallelSpec),
    Branch(BranchSpec),
    ParallelFor(LoopSpec),
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::Function(f) => &f.name,
            NodeSpec::Sequence(s) => &s.name,
            NodeSpec::Parallel(p) => &p.name,
            NodeSpec::Branch(b) => &b.name,
            NodeSpec::ParallelFor(l) => &l.name,
        }
    }

    /// Direct sub-specs, in declaration order
    pub fn children(&self) -> Vec<&NodeSpec> {
        match self {
            NodeSpec::Function(f) => f.next.iter().collect(),
            NodeSpec::Sequence(s) => s.steps.iter().collect(),
            NodeSpec::Parallel(p) => p.branches.iter().chain(p.join.as_deref()).collect(),
            NodeSpec::Branch(b) => b
                .arms
                .iter()
                .map(|arm| &arm.node)
                .chain(b.join.as_deref())
                .collect(),
            NodeSpec::ParallelFor(l) => std::iter::once(l.body.as_ref())
                .chain(l.join.as_deref())
                .collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Check structure without building
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        self.validate_into(&mut seen)
    }

    fn validate_into<'a>(&'a self, seen: &mut HashSet<&'a str>) -> Result<()> {
        let invalid = |reason: String| Err(EnactError::InvalidWorkflow { reason });

        let name = self.name();
        if name.trim().is_empty() {
            return invalid("node with empty name".to_string());
        }
        if name.contains('/') {
            return invalid(format!("node name '{}' must not contain '/'", name));
        }
        if !seen.insert(name) {
            return invalid(format!("duplicate node name '{}'", name));
        }

        match self {
            NodeSpec::Parallel(p) if p.branches.is_empty() => {
                return invalid(format!("parallel '{}' has no branches", p.name));
            }
            NodeSpec::Branch(b) if b.arms.is_empty() => {
                return invalid(format!("branch '{}' has no arms", b.name));
            }
            NodeSpec::ParallelFor(l) if l.concurrency_limit == Some(0) => {
                return invalid(format!("loop '{}' has concurrencyLimit 0", l.name));
            }
            _ => {}
        }

        for child in self.children() {
            child.validate_into(seen)?;
        }
        Ok(())
    }

    /// Build the runtime node (does not validate; see [`WorkflowSpec::build`])
    pub fn build(&self) -> Arc<dyn Node> {
        let build_all = |specs: &[NodeSpec]| specs.iter().map(NodeSpec::build).collect::<Vec<_>>();

        match self {
            NodeSpec::Function(f) => {
                let function_type = f.function_type.as_deref().unwrap_or(&f.name);
                let mut node = FunctionNode::new(f.name.as_str(), function_type);
                if let Some(deployment) = &f.deployment {
                    node = node.with_deployment(deployment.clone());
                }
                for p in &f.properties {
                    node = node.with_property(p.name.clone(), p.value.clone());
                }
                for c in &f.constraints {
                    node = node.with_constraint(c.name.clone(), c.value.clone());
                }
                for input in &f.data_ins {
                    node = node.with_input(input.clone());
                }
                for output in &f.data_outs {
                    node = node.with_output(output.clone());
                }
                for child in build_all(&f.next) {
                    node = node.with_child(child);
                }
                Arc::new(node)
            }
            NodeSpec::Sequence(s) => Arc::new(SequenceNode::new(s.name.as_str(), build_all(&s.steps))),
            NodeSpec::Parallel(p) => {
                let mut node = ParallelNode::new(p.name.as_str(), build_all(&p.branches));
                if let Some(join) = &p.join {
                    node = node.with_join(join.build());
                }
                Arc::new(node)
            }
            NodeSpec::Branch(b) => {
                let arms = b
                    .arms
                    .iter()
                    .map(|arm| BranchArm {
                        condition: arm.condition.clone(),
                        node: arm.node.build(),
                    })
                    .collect();
                let mut node = BranchNode::new(b.name.as_str(), arms);
                if let Some(join) = &b.join {
                    node = node.with_join(join.build());
                }
                Arc::new(node)
            }
            NodeSpec::ParallelFor(l) => {
                let mut node = BoundedLoopNode::new(l.name.as_str(), l.bounds.clone(), l.body.build());
                if let Some(limit) = l.concurrency_limit {
                    node = node.with_concurrency_limit(limit);
                }
                if let Some(join) = &l.join {
                    node = node.with_join(join.build());
                }
                Arc::new(node)
            }
        }
    }
}

/// A named node tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub root: NodeSpec,
}

impl WorkflowSpec {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EnactError::InvalidWorkflow {
                reason: "workflow has no name".to_string(),
            });
        }
        self.root.validate()
    }

    pub fn build(&self) -> Result<Arc<dyn Node>> {
        self.validate()?;
        Ok(self.root.build())
    }
}
