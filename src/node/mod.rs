//! # Execution Node Tree
//!
//! A workflow runs as a tree of [`Node`]s. Data flows downward: a node
//! receives its input through [`Node::pass_result`], and [`Node::call`]
//! executes it and then its children.
//!
//! | Node | Behaviour |
//! |------|-----------|
//! | [`FunctionNode`] | invokes one serverless function |
//! | [`SequenceNode`] | chains its steps, each seeing the earlier outputs |
//! | [`ParallelNode`] | runs all branches concurrently, then an optional join |
//! | [`BranchNode`] | runs the first arm whose condition holds |
//! | [`BoundedLoopNode`] | runs a fresh copy of its body per iteration |
//!
//! Input is held as an `Arc<DataValues>` snapshot. `pass_result` swaps the
//! snapshot in one write; concurrent writers never interleave and the last
//! one wins.

mod bounded_loop;
mod branch;
mod condition;
mod function;
mod parallel;
mod sequence;

pub use bounded_loop::{BoundedLoopNode, LoopBounds};
pub use branch::{BranchArm, BranchNode};
pub use condition::{resolve_operand, Combinator, Comparison, Condition, Operator};
pub use function::FunctionNode;
pub use parallel::ParallelNode;
pub use sequence::SequenceNode;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::Result;

/// Upstream output key → value
pub type DataValues = HashMap<String, Value>;

/// Key under which a node publishes one of its outputs
pub fn output_key(node: &str, name: &str) -> String {
    format!("{}/{}", node, name)
}

/// Loop position a call runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopScope {
    /// Iteration index, `-1` outside a loop
    pub counter: i64,
    /// Iteration count of the enclosing loop, `-1` outside a loop
    pub max: i64,
    /// How many iterations may run at once, `None` when unbounded
    pub concurrency_limit: Option<usize>,
}

impl LoopScope {
    pub const NONE: LoopScope = LoopScope {
        counter: -1,
        max: -1,
        concurrency_limit: None,
    };

    pub fn iteration(counter: i64, max: i64, concurrency_limit: Option<usize>) -> Self {
        Self {
            counter,
            max,
            concurrency_limit,
        }
    }

    pub fn in_loop(&self) -> bool {
        self.counter >= 0
    }
}

impl Default for LoopScope {
    fn default() -> Self {
        Self::NONE
    }
}

/// Result of calling a subtree
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    /// Union of the terminal outputs of the subtree
    pub output: Arc<DataValues>,
}

impl Outcome {
    pub fn succeeded(output: Arc<DataValues>) -> Self {
        Self {
            success: true,
            output,
        }
    }

    pub fn failed(output: Arc<DataValues>) -> Self {
        Self {
            success: false,
            output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Function,
    Sequence,
    Parallel,
    Branch,
    BoundedLoop,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Function => "function",
            NodeKind::Sequence => "sequence",
            NodeKind::Parallel => "parallel",
            NodeKind::Branch => "branch",
            NodeKind::BoundedLoop => "parallelFor",
        };
        f.write_str(name)
    }
}

/// Mutable state every node carries
#[derive(Debug, Default)]
pub struct NodeState {
    data_values: RwLock<Arc<DataValues>>,
    result: RwLock<Option<Arc<DataValues>>>,
    /// Serializes whole `pass_result` propagations through this node
    forwarding: Mutex<()>,
}

impl NodeState {
    pub fn data_values(&self) -> Arc<DataValues> {
        Arc::clone(&self.data_values.read())
    }

    pub fn result(&self) -> Option<Arc<DataValues>> {
        self.result.read().clone()
    }

    pub fn set_result(&self, output: Arc<DataValues>) {
        *self.result.write() = Some(output);
    }

    /// Swap in `input`, then hand the same snapshot to every child
    pub fn forward(&self, input: Arc<DataValues>, children: &[Arc<dyn Node>]) {
        let _guard = self.forwarding.lock();
        *self.data_values.write() = Arc::clone(&input);
        for child in children {
            child.pass_result(Arc::clone(&input));
        }
    }
}

#[async_trait]
pub trait Node: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn state(&self) -> &NodeState;

    /// Nodes that receive this node's input when it is passed in
    fn children(&self) -> Vec<Arc<dyn Node>>;

    /// Replace this node's input and forward it to every child
    fn pass_result(&self, input: Arc<DataValues>) {
        self.state().forward(input, &self.children());
    }

    fn data_values(&self) -> Arc<DataValues> {
        self.state().data_values()
    }

    /// Output of the last successful call
    fn result(&self) -> Option<Arc<DataValues>> {
        self.state().result()
    }

    /// Execute this node and then its subtree.
    ///
    /// Node-local failures come back as a failed [`Outcome`]; `Err` is
    /// reserved for faults that make the whole run meaningless.
    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome>;

    /// Deep copy of the subtree with fresh state (one per loop iteration)
    fn duplicate(&self) -> Arc<dyn Node>;
}

/// Feed `output` to each child and call them in order.
///
/// A failing child does not stop its later siblings.
pub(crate) async fn run_children(
    ctx: &Arc<ExecutionContext>,
    scope: LoopScope,
    output: Arc<DataValues>,
    children: &[Arc<dyn Node>],
) -> Result<Outcome> {
    if children.is_empty() {
        return Ok(Outcome::succeeded(output));
    }

    let mut success = true;
    let mut merged = DataValues::new();
    for child in children {
        child.pass_result(Arc::clone(&output));
        let outcome = child.call(ctx, scope).await?;
        success &= outcome.success;
        merge_into(&mut merged, &outcome.output);
    }

    Ok(Outcome {
        success,
        output: Arc::new(merged),
    })
}

pub(crate) fn merge_into(target: &mut DataValues, source: &DataValues) {
    target.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
}

pub(crate) fn duplicate_all(nodes: &[Arc<dyn Node>]) -> Vec<Arc<dyn Node>> {
    nodes.iter().map(|n| n.duplicate()).collect()
}
