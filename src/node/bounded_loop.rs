//! Parallel-for loop
//!
//! Each iteration runs a fresh copy of the body, so iterations never share
//! node state. A semaphore bounds how many iterations run at once.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::parallel::{continue_with_join, join_ordered};
use super::{output_key, resolve_operand, DataValues, LoopScope, Node, NodeKind, NodeState, Outcome};
use crate::context::ExecutionContext;
use crate::error::{EnactError, Result};

/// How many iterations a loop runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopBounds {
    /// One iteration per element of the collection under this input key
    Iterate { iterate: String },
    /// `from` up to (excluding) `to`; operands are literals or input keys
    Range {
        from: Value,
        to: Value,
        #[serde(default = "default_step")]
        step: Value,
    },
}

fn default_step() -> Value {
    Value::from(1)
}

impl LoopBounds {
    pub fn range(from: i64, to: i64, step: i64) -> Self {
        Self::Range {
            from: Value::from(from),
            to: Value::from(to),
            step: Value::from(step),
        }
    }

    pub fn iterate(key: impl Into<String>) -> Self {
        Self::Iterate {
            iterate: key.into(),
        }
    }

    /// Iterations this loop runs with the given input
    fn resolve(&self, node: &str, data: &DataValues) -> Result<Iterations> {
        let iterations = match self {
            LoopBounds::Iterate { iterate } => match data.get(iterate) {
                Some(Value::Array(items)) => Iterations::Elements(items.clone()),
                Some(other) => {
                    return Err(EnactError::InvalidWorkflow {
                        reason: format!("loop '{}' iterates '{}' which is not a collection: {}", node, iterate, other),
                    })
                }
                None => {
                    return Err(EnactError::MissingInputData {
                        node: node.to_string(),
                        source_key: iterate.clone(),
                    })
                }
            },
            LoopBounds::Range { from, to, step } => {
                let from = integer_operand(node, "from", from, data)?;
                let to = integer_operand(node, "to", to, data)?;
                let step = integer_operand(node, "step", step, data)?;
                if step <= 0 {
                    return Err(EnactError::InvalidWorkflow {
                        reason: format!("loop '{}' has non-positive step {}", node, step),
                    });
                }

                // i128 keeps `to - from` exact for any pair of i64 bounds
                let span = i128::from(to) - i128::from(from);
                let count = if span <= 0 {
                    0
                } else {
                    (span - 1) / i128::from(step) + 1
                };
                Iterations::Range {
                    from,
                    step,
                    count: u64::try_from(count).unwrap_or(u64::MAX),
                }
            }
        };

        if iterations.len() > MAX_ITERATIONS {
            return Err(EnactError::InvalidWorkflow {
                reason: format!(
                    "loop '{}' would run {} iterations, the limit is {}",
                    node,
                    iterations.len(),
                    MAX_ITERATIONS
                ),
            });
        }
        Ok(iterations)
    }
}

/// Upper bound on iterations of a single loop call
pub const MAX_ITERATIONS: u64 = 1_000_000;

/// Resolved iteration space, generated lazily
#[derive(Debug, Clone, PartialEq)]
enum Iterations {
    Range { from: i64, step: i64, count: u64 },
    Elements(Vec<Value>),
}

impl Iterations {
    fn len(&self) -> u64 {
        match self {
            Iterations::Range { count, .. } => *count,
            Iterations::Elements(items) => items.len() as u64,
        }
    }

    /// Counter value and optional element of iteration `index`
    fn get(&self, index: u64) -> (Value, Option<Value>) {
        match self {
            Iterations::Range { from, step, .. } => {
                // Every counter below `count` lies in [from, to), so this fits i64
                let counter = i128::from(*from) + i128::from(index) * i128::from(*step);
                (Value::from(counter as i64), None)
            }
            Iterations::Elements(items) => {
                (Value::from(index as i64), items.get(index as usize).cloned())
            }
        }
    }
}

fn integer_operand(node: &str, role: &str, operand: &Value, data: &DataValues) -> Result<i64> {
    let value = resolve_operand(operand, data);
    let integer = match &value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    integer.ok_or_else(|| EnactError::InvalidWorkflow {
        reason: format!("loop '{}' bound '{}' is not an integer: {}", node, role, value),
    })
}

#[derive(Debug)]
pub struct BoundedLoopNode {
    name: Arc<str>,
    bounds: LoopBounds,
    concurrency_limit: Option<usize>,
    body: Arc<dyn Node>,
    join: Option<Arc<dyn Node>>,
    state: NodeState,
}

impl BoundedLoopNode {
    pub fn new(name: impl Into<Arc<str>>, bounds: LoopBounds, body: Arc<dyn Node>) -> Self {
        Self {
            name: name.into(),
            bounds,
            concurrency_limit: None,
            body,
            join: None,
            state: NodeState::default(),
        }
    }

    /// At most `limit` iterations in flight, clamped to `1..=Semaphore::MAX_PERMITS`
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit.clamp(1, Semaphore::MAX_PERMITS));
        self
    }

    pub fn with_join(mut self, join: Arc<dyn Node>) -> Self {
        self.join = Some(join);
        self
    }

    pub fn counter_key(&self) -> String {
        output_key(&self.name, "counter")
    }

    pub fn element_key(&self) -> String {
        output_key(&self.name, "element")
    }
}

/// Collect every key into an array ordered by iteration (missing → null)
fn collect_by_key(outcomes: &[Outcome]) -> DataValues {
    let keys: BTreeSet<&String> = outcomes.iter().flat_map(|o| o.output.keys()).collect();
    keys.into_iter()
        .map(|key| {
            let column = outcomes
                .iter()
                .map(|o| o.output.get(key).cloned().unwrap_or(Value::Null))
                .collect();
            (key.clone(), Value::Array(column))
        })
        .collect()
}

#[async_trait]
impl Node for BoundedLoopNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::BoundedLoop
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    /// Iterations get their own copies of the body; only the join is fed directly
    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.join.iter().cloned().collect()
    }

    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome> {
        let input = self.state.data_values();

        let iterations = match self.bounds.resolve(&self.name, &input) {
            Ok(iterations) => iterations,
            Err(e) => {
                error!(node = %self.name, "{}", e);
                return Ok(Outcome::failed(Arc::new(DataValues::new())));
            }
        };
        let max = iterations.len() as i64;
        let limit = self
            .concurrency_limit
            .or(scope.concurrency_limit)
            .map(|limit| limit.clamp(1, Semaphore::MAX_PERMITS));
        debug!(node = %self.name, iterations = max, ?limit, "Starting loop");

        let semaphore = Arc::new(Semaphore::new(limit.unwrap_or(Semaphore::MAX_PERMITS)));
        let mut set = JoinSet::new();

        for index in 0..iterations.len() {
            // Acquire before copying the body; only `limit` copies run at once
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();

            let (counter, element) = iterations.get(index);
            let mut iteration_input = (*input).clone();
            iteration_input.insert(self.counter_key(), counter);
            if let Some(element) = element {
                iteration_input.insert(self.element_key(), element);
            }

            let body = self.body.duplicate();
            body.pass_result(Arc::new(iteration_input));

            let index = index as usize;
            let iteration_scope = LoopScope::iteration(index as i64, max, limit);
            let ctx = Arc::clone(ctx);
            set.spawn(async move {
                let _permit = permit;
                (index, body.call(&ctx, iteration_scope).await)
            });
        }

        let outcomes = join_ordered(&self.name, set, max as usize).await?;
        let success = outcomes.iter().all(|o| o.success);
        let joined = Arc::new(collect_by_key(&outcomes));
        self.state.set_result(Arc::clone(&joined));

        let joined = Outcome {
            success,
            output: joined,
        };
        continue_with_join(ctx, scope, self.join.as_ref(), joined).await
    }

    fn duplicate(&self) -> Arc<dyn Node> {
        Arc::new(Self {
            name: Arc::clone(&self.name),
            bounds: self.bounds.clone(),
            concurrency_limit: self.concurrency_limit,
            body: self.body.duplicate(),
            join: self.join.as_ref().map(|j| j.duplicate()),
            state: NodeState::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SequenceNode;
    use serde_json::json;

    #[test]
    fn range_excludes_upper_bound() {
        let iterations = LoopBounds::range(0, 6, 2).resolve("l", &DataValues::new()).unwrap();
        let values: Vec<_> = (0..iterations.len()).map(|i| iterations.get(i).0).collect();
        assert_eq!(values, vec![json!(0), json!(2), json!(4)]);
        assert_eq!(LoopBounds::range(0, 5, 2).resolve("l", &DataValues::new()).unwrap().len(), 3);
        assert_eq!(LoopBounds::range(4, 1, 1).resolve("l", &DataValues::new()).unwrap().len(), 0);
    }

    #[test]
    fn range_operands_can_be_input_keys() {
        let mut data = DataValues::new();
        data.insert("split/n".into(), json!(3.0));
        let bounds = LoopBounds::Range {
            from: json!(0),
            to: json!("split/n"),
            step: json!(1),
        };
        assert_eq!(bounds.resolve("l", &data).unwrap().len(), 3);
    }

    #[test]
    fn iterate_yields_elements() {
        let mut data = DataValues::new();
        data.insert("split/items".into(), json!(["a", "b"]));
        let iterations = LoopBounds::iterate("split/items").resolve("l", &data).unwrap();
        assert_eq!(iterations.get(1), (json!(1), Some(json!("b"))));
    }

    #[test]
    fn range_at_i64_edges_does_not_overflow() {
        let iterations = LoopBounds::range(i64::MAX - 1, i64::MAX, 2)
            .resolve("l", &DataValues::new())
            .unwrap();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations.get(0).0, json!(i64::MAX - 1));

        let iterations = LoopBounds::range(i64::MAX - 10, i64::MAX, i64::MAX)
            .resolve("l", &DataValues::new())
            .unwrap();
        assert_eq!(iterations.len(), 1);
    }

    #[test]
    fn oversized_ranges_are_rejected() {
        let err = LoopBounds::range(0, 10_000_000_000, 1)
            .resolve("l", &DataValues::new())
            .unwrap_err();
        assert!(matches!(err, EnactError::InvalidWorkflow { .. }));

        let err = LoopBounds::range(i64::MIN, i64::MAX, 1)
            .resolve("l", &DataValues::new())
            .unwrap_err();
        assert!(err.to_string().contains("iterations"));
    }

    #[test]
    fn concurrency_limit_is_clamped() {
        let body: Arc<dyn Node> = Arc::new(SequenceNode::new("s", Vec::new()));
        let huge = BoundedLoopNode::new("l", LoopBounds::range(0, 1, 1), Arc::clone(&body))
            .with_concurrency_limit(usize::MAX);
        assert_eq!(huge.concurrency_limit, Some(Semaphore::MAX_PERMITS));
        let zero = BoundedLoopNode::new("l", LoopBounds::range(0, 1, 1), body).with_concurrency_limit(0);
        assert_eq!(zero.concurrency_limit, Some(1));
    }

    #[test]
    fn bad_bounds_are_rejected() {
        assert!(LoopBounds::range(0, 5, 0).resolve("l", &DataValues::new()).is_err());
        assert!(matches!(
            LoopBounds::iterate("missing").resolve("l", &DataValues::new()),
            Err(EnactError::MissingInputData { .. })
        ));
    }

    #[test]
    fn columns_are_ordered_by_iteration() {
        let outcome = |pairs: &[(&str, Value)]| {
            Outcome::succeeded(Arc::new(
                pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ))
        };
        let joined = collect_by_key(&[
            outcome(&[("f/x", json!(0))]),
            outcome(&[("f/x", json!(1)), ("f/y", json!("only"))]),
        ]);
        assert_eq!(joined["f/x"], json!([0, 1]));
        assert_eq!(joined["f/y"], json!([null, "only"]));
    }

    #[test]
    fn bounds_deserialize_untagged() {
        let b: LoopBounds = serde_json::from_value(json!({"iterate": "a/b"})).unwrap();
        assert_eq!(b, LoopBounds::iterate("a/b"));
        let b: LoopBounds = serde_json::from_value(json!({"from": 0, "to": 4})).unwrap();
        assert_eq!(b, LoopBounds::range(0, 4, 1));
    }
}
