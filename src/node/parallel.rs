use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{
    duplicate_all, merge_into, DataValues, LoopScope, Node, NodeKind, NodeState, Outcome,
};
use crate::context::ExecutionContext;
use crate::error::{EnactError, Result};

/// Runs every branch concurrently, then the optional join with their union
#[derive(Debug)]
pub struct ParallelNode {
    name: Arc<str>,
    branches: Vec<Arc<dyn Node>>,
    join: Option<Arc<dyn Node>>,
    state: NodeState,
}

impl ParallelNode {
    pub fn new(name: impl Into<Arc<str>>, branches: Vec<Arc<dyn Node>>) -> Self {
        Self {
            name: name.into(),
            branches,
            join: None,
            state: NodeState::default(),
        }
    }

    pub fn with_join(mut self, join: Arc<dyn Node>) -> Self {
        self.join = Some(join);
        self
    }
}

/// Wait for every spawned subtree and return their outcomes by index.
///
/// Every task is awaited even if one panics; the first panic or `Err` is
/// returned afterwards.
pub(super) async fn join_ordered(
    owner: &str,
    mut set: JoinSet<(usize, Result<Outcome>)>,
    count: usize,
) -> Result<Vec<Outcome>> {
    let mut slots: Vec<Option<Outcome>> = vec![None; count];
    let mut first_error = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(outcome))) => slots[index] = Some(outcome),
            Ok((_, Err(e))) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                warn!(node = owner, error = %e, "Spawned subtree did not complete");
                first_error.get_or_insert(EnactError::TaskPanicked {
                    node: owner.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Outcome::failed(Arc::new(DataValues::new()))))
        .collect())
}

/// Pass the joined data to the continuation (if any) and call it
pub(super) async fn continue_with_join(
    ctx: &Arc<ExecutionContext>,
    scope: LoopScope,
    join: Option<&Arc<dyn Node>>,
    joined: Outcome,
) -> Result<Outcome> {
    let Some(join) = join else {
        return Ok(joined);
    };
    join.pass_result(Arc::clone(&joined.output));
    let outcome = join.call(ctx, scope).await?;
    Ok(Outcome {
        success: joined.success && outcome.success,
        output: outcome.output,
    })
}

#[async_trait]
impl Node for ParallelNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Parallel
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.branches.iter().chain(self.join.iter()).cloned().collect()
    }

    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome> {
        let input = self.state.data_values();
        debug!(node = %self.name, branches = self.branches.len(), "Starting parallel branches");

        let mut set = JoinSet::new();
        for (index, branch) in self.branches.iter().enumerate() {
            branch.pass_result(Arc::clone(&input));
            let branch = Arc::clone(branch);
            let ctx = Arc::clone(ctx);
            set.spawn(async move { (index, branch.call(&ctx, scope).await) });
        }

        let outcomes = join_ordered(&self.name, set, self.branches.len()).await?;

        let mut union = DataValues::new();
        let mut success = true;
        for outcome in &outcomes {
            success &= outcome.success;
            merge_into(&mut union, &outcome.output);
        }
        let union = Arc::new(union);
        self.state.set_result(Arc::clone(&union));

        let joined = Outcome {
            success,
            output: union,
        };
        continue_with_join(ctx, scope, self.join.as_ref(), joined).await
    }

    fn duplicate(&self) -> Arc<dyn Node> {
        let mut copy = Self::new(Arc::clone(&self.name), duplicate_all(&self.branches));
        copy.join = self.join.as_ref().map(|j| j.duplicate());
        Arc::new(copy)
    }
}
