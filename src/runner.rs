//! Workflow runner
//!
//! Feeds the workflow input to the root node, calls it, and brackets the
//! run with `WORKFLOW_STARTED` / `WORKFLOW_COMPLETED` events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument};

use crate::context::ExecutionContext;
use crate::error::{EnactError, Result};
use crate::event_log::{EventKind, EventLog};
use crate::node::{output_key, DataValues, LoopScope, Node};

/// Final state of a workflow run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    /// Union of the terminal outputs of the tree
    pub output: Arc<DataValues>,
    pub duration: Duration,
}

impl RunResult {
    /// Output as a JSON object (keys sorted)
    pub fn output_json(&self) -> Value {
        Value::Object(
            self.output
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Key a workflow input object under `<workflow>/<key>`.
///
/// Keys that already contain a `/` are kept as they are.
pub fn workflow_input(workflow: &str, input: Value) -> Result<DataValues> {
    match input {
        Value::Null => Ok(DataValues::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| {
                let key = if key.contains('/') {
                    key
                } else {
                    output_key(workflow, &key)
                };
                (key, value)
            })
            .collect()),
        other => Err(EnactError::InvalidWorkflow {
            reason: format!("workflow input must be a JSON object, got {}", other),
        }),
    }
}

pub struct Runner {
    ctx: Arc<ExecutionContext>,
}

impl Runner {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn event_log(&self) -> &EventLog {
        self.ctx.event_log()
    }

    #[instrument(skip_all, fields(root = root.name()))]
    pub async fn run(&self, root: Arc<dyn Node>, input: DataValues) -> Result<RunResult> {
        let start = Instant::now();
        let execution_id = self.ctx.execution_id();

        if let Some(execution_id) = execution_id {
            // EMIT: WorkflowStarted
            self.ctx.event_log().emit(EventKind::WorkflowStarted {
                execution_id,
                root: root.name().into(),
                run_kind: self.ctx.run_kind(),
            });
        }
        info!(?execution_id, inputs = input.len(), "Starting workflow");

        root.pass_result(Arc::new(input));
        let outcome = root.call(&self.ctx, LoopScope::NONE).await?;

        let result = RunResult {
            success: outcome.success,
            output: outcome.output,
            duration: start.elapsed(),
        };

        if execution_id.is_some() {
            // EMIT: WorkflowCompleted
            self.ctx.event_log().emit(EventKind::WorkflowCompleted {
                success: result.success,
                output: result.output_json(),
                total_duration_ms: result.duration.as_millis() as u64,
            });
        }
        info!(
            success = result.success,
            duration_ms = result.duration.as_millis() as u64,
            "Workflow finished"
        );

        Ok(result)
    }
}
