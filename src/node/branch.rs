use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::parallel::continue_with_join;
use super::{Condition, LoopScope, Node, NodeKind, NodeState, Outcome};
use crate::context::ExecutionContext;
use crate::error::Result;

/// One arm of a branch; an arm without condition always matches
#[derive(Debug, Clone)]
pub struct BranchArm {
    pub condition: Option<Condition>,
    pub node: Arc<dyn Node>,
}

impl BranchArm {
    pub fn when(condition: Condition, node: Arc<dyn Node>) -> Self {
        Self {
            condition: Some(condition),
            node,
        }
    }

    pub fn otherwise(node: Arc<dyn Node>) -> Self {
        Self {
            condition: None,
            node,
        }
    }
}

/// Runs the first arm whose condition holds, then the optional join.
///
/// When no arm matches the input is passed through unchanged.
#[derive(Debug)]
pub struct BranchNode {
    name: Arc<str>,
    arms: Vec<BranchArm>,
    join: Option<Arc<dyn Node>>,
    state: NodeState,
}

impl BranchNode {
    pub fn new(name: impl Into<Arc<str>>, arms: Vec<BranchArm>) -> Self {
        Self {
            name: name.into(),
            arms,
            join: None,
            state: NodeState::default(),
        }
    }

    pub fn with_join(mut self, join: Arc<dyn Node>) -> Self {
        self.join = Some(join);
        self
    }
}

#[async_trait]
impl Node for BranchNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Branch
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.arms
            .iter()
            .map(|arm| Arc::clone(&arm.node))
            .chain(self.join.iter().cloned())
            .collect()
    }

    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome> {
        let input = self.state.data_values();

        let selected = self.arms.iter().position(|arm| {
            arm.condition
                .as_ref()
                .map_or(true, |condition| condition.holds(&input))
        });

        let outcome = match selected {
            Some(index) => {
                let arm = &self.arms[index].node;
                debug!(node = %self.name, arm = index, target = arm.name(), "Branch selected");
                arm.pass_result(Arc::clone(&input));
                arm.call(ctx, scope).await?
            }
            None => {
                debug!(node = %self.name, "No branch arm matched, passing input through");
                Outcome::succeeded(Arc::clone(&input))
            }
        };

        self.state.set_result(Arc::clone(&outcome.output));
        continue_with_join(ctx, scope, self.join.as_ref(), outcome).await
    }

    fn duplicate(&self) -> Arc<dyn Node> {
        let arms = self
            .arms
            .iter()
            .map(|arm| BranchArm {
                condition: arm.condition.clone(),
                node: arm.node.duplicate(),
            })
            .collect();
        let mut copy = Self::new(Arc::clone(&self.name), arms);
        copy.join = self.join.as_ref().map(|j| j.duplicate());
        Arc::new(copy)
    }
}
