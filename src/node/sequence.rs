use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{duplicate_all, merge_into, DataValues, LoopScope, Node, NodeKind, NodeState, Outcome};
use crate::context::ExecutionContext;
use crate::error::Result;

/// Runs its steps as a chain.
///
/// Each step sees the sequence input plus everything the earlier steps
/// produced. The first failing step ends the sequence.
#[derive(Debug)]
pub struct SequenceNode {
    name: Arc<str>,
    children: Vec<Arc<dyn Node>>,
    state: NodeState,
}

impl SequenceNode {
    pub fn new(name: impl Into<Arc<str>>, children: Vec<Arc<dyn Node>>) -> Self {
        Self {
            name: name.into(),
            children,
            state: NodeState::default(),
        }
    }
}

#[async_trait]
impl Node for SequenceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sequence
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.children.clone()
    }

    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome> {
        let input: Arc<DataValues> = self.state.data_values();
        if self.children.is_empty() {
            self.state.set_result(Arc::clone(&input));
            return Ok(Outcome::succeeded(input));
        }

        let mut available = (*input).clone();
        let mut produced = DataValues::new();
        for (index, step) in self.children.iter().enumerate() {
            step.pass_result(Arc::new(available.clone()));
            let outcome = step.call(ctx, scope).await?;
            merge_into(&mut produced, &outcome.output);

            if !outcome.success {
                debug!(node = %self.name, step = step.name(), index, "Sequence stopped at failed step");
                return Ok(Outcome::failed(Arc::new(produced)));
            }

            // Own outputs of a step with children are not in its outcome
            if let Some(result) = step.result() {
                merge_into(&mut available, &result);
            }
            merge_into(&mut available, &outcome.output);
        }

        let produced = Arc::new(produced);
        self.state.set_result(Arc::clone(&produced));
        Ok(Outcome::succeeded(produced))
    }

    fn duplicate(&self) -> Arc<dyn Node> {
        Arc::new(Self::new(Arc::clone(&self.name), duplicate_all(&self.children)))
    }
}
