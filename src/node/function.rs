//! Function node: one serverless function invocation
//!
//! Call sequence:
//! 1. resolve inputs from the current `dataValues` (source key, else literal)
//! 2. pick the endpoint from the `resource` property
//! 3. invoke directly, or through the fault-tolerance engine when the node
//!    declares any constraint
//! 4. parse the raw result into typed outputs
//! 5. store the outputs and continue with the children
//!
//! A failure in steps 1-4 fails only this node's branch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use super::{duplicate_all, output_key, run_children, DataValues, LoopScope, Node, NodeKind, NodeState, Outcome};
use crate::ast::{DataIn, DataOut, PropertyConstraint};
use crate::context::ExecutionContext;
use crate::error::{EnactError, Result};
use crate::event_log::InvocationRecord;
use crate::invocation::{next_invocation_id, Attempt, DeclaredConstraints, InvocationRequest, PairResult};
use crate::output::{coerce, parse_outputs};
use crate::provider::{detect_provider, detect_region, Deployment};

/// Property holding the function URL
pub const RESOURCE_PROPERTY: &str = "resource";
/// Property listing an external service the function uses
pub const SERVICE_PROPERTY: &str = "service";

/// Inputs split by destination
#[derive(Debug, Default, PartialEq)]
struct ResolvedInputs {
    /// Sent to the function
    actual: DataValues,
    /// Copied straight into this node's outputs (pass-through / replicate)
    passed: DataValues,
}

#[derive(Debug)]
pub struct FunctionNode {
    name: Arc<str>,
    function_type: Arc<str>,
    deployment: Option<String>,
    properties: Vec<PropertyConstraint>,
    constraints: Vec<PropertyConstraint>,
    inputs: Vec<DataIn>,
    outputs: Vec<DataOut>,
    children: Vec<Arc<dyn Node>>,
    state: NodeState,
}

impl FunctionNode {
    pub fn new(name: impl Into<Arc<str>>, function_type: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            function_type: function_type.into(),
            deployment: None,
            properties: Vec::new(),
            constraints: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
            state: NodeState::default(),
        }
    }

    /// Shorthand for a node whose `resource` property is `endpoint`
    pub fn at(name: impl Into<Arc<str>>, endpoint: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(Arc::clone(&name), name).with_property(RESOURCE_PROPERTY, endpoint)
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(PropertyConstraint::new(name, value));
        self
    }

    pub fn with_constraint(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.push(PropertyConstraint::new(name, value));
        self
    }

    pub fn with_input(mut self, input: DataIn) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: DataOut) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_child(mut self, child: Arc<dyn Node>) -> Self {
        self.children.push(child);
        self
    }

    pub fn function_type(&self) -> &str {
        &self.function_type
    }

    pub fn resource_link(&self) -> Result<&str> {
        self.properties
            .iter()
            .find(|p| p.name == RESOURCE_PROPERTY)
            .map(|p| p.value.trim())
            .filter(|link| !link.is_empty())
            .ok_or_else(|| EnactError::MissingResourceLink {
                node: self.name.to_string(),
            })
    }

    /// External services named by `service` properties
    pub fn used_services(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.name == SERVICE_PROPERTY)
            .flat_map(|p| p.value.split(','))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn resolve_inputs(&self, data_values: &DataValues) -> Result<ResolvedInputs> {
        let mut resolved = ResolvedInputs::default();

        for input in &self.inputs {
            let upstream = input.source.as_deref().and_then(|key| data_values.get(key));
            match (upstream, &input.value) {
                (Some(value), _) => {
                    if input.passing || input.is_replicated() {
                        resolved
                            .passed
                            .insert(output_key(&self.name, &input.name), value.clone());
                    }
                    if !input.passing {
                        resolved.actual.insert(input.name.clone(), value.clone());
                    }
                }
                (None, Some(literal)) => {
                    let value = coerce(input.data_type, literal).unwrap_or_else(|| {
                        warn!(
                            node = %self.name,
                            input = %input.name,
                            expected = %input.data_type,
                            "Literal does not match its declared type, sending it unchanged"
                        );
                        literal.clone()
                    });
                    resolved.actual.insert(input.name.clone(), value);
                }
                (None, None) => {
                    return Err(EnactError::MissingInputData {
                        node: self.name.to_string(),
                        source_key: input.source.clone().unwrap_or_else(|| input.name.clone()),
                    })
                }
            }
        }

        Ok(resolved)
    }

    fn prepare(&self, data_values: &DataValues) -> Result<(InvocationRequest, DataValues)> {
        let endpoint = self.resource_link()?.to_string();
        let resolved = self.resolve_inputs(data_values)?;
        let constraints = DeclaredConstraints::parse(&self.constraints)?;

        let request = InvocationRequest {
            node_name: Arc::clone(&self.name),
            endpoint,
            inputs: resolved.actual,
            deployment: self.deployment.clone(),
            constraints,
        };
        Ok((request, resolved.passed))
    }

    /// Measured RTT minus the simulated RTT of the services the function uses
    fn function_rtt(&self, ctx: &ExecutionContext, rtt: Duration, endpoint: &str) -> Duration {
        let services = self.used_services();
        if services.is_empty() {
            return rtt;
        }
        let region = self
            .deployment
            .as_deref()
            .and_then(Deployment::parse)
            .map(|d| d.region)
            .or_else(|| detect_region(endpoint));
        match region {
            Some(region) => rtt.saturating_sub(ctx.service_rtt().services_rtt(&region, &services)),
            None => rtt,
        }
    }

    fn record_attempt(&self, ctx: &ExecutionContext, id: u64, scope: LoopScope, attempt: &Attempt) {
        let rtt = if attempt.succeeded() {
            self.function_rtt(ctx, attempt.rtt, &attempt.endpoint)
        } else {
            attempt.rtt
        };

        ctx.record(|execution_id| InvocationRecord {
            invocation_id: id,
            execution_id,
            endpoint: attempt.endpoint.clone(),
            provider: detect_provider(&attempt.endpoint),
            deployment: self.deployment.clone(),
            node_name: Arc::clone(&self.name),
            node_type: Arc::clone(&self.function_type),
            result: attempt.result.as_deref().map(|r| ctx.loggable_text(r)),
            rtt_ms: rtt.as_millis() as u64,
            success: attempt.succeeded(),
            loop_counter: scope.counter,
            max_loop_counter: scope.max,
            started_at: attempt.started_at,
            run_kind: ctx.run_kind(),
        });
    }

    fn record_attempts(&self, ctx: &ExecutionContext, id: u64, scope: LoopScope, attempts: &[Attempt]) {
        for attempt in attempts {
            self.record_attempt(ctx, id, scope, attempt);
        }
    }

    fn log_input(&self, ctx: &ExecutionContext, inputs: &DataValues, id: u64) {
        if inputs.len() > ctx.config().large_input_entries {
            info!(node = %self.name, id, "Input for function is large");
        } else {
            info!(node = %self.name, id, "Input for function: {}", ctx.loggable_inputs(inputs));
        }
    }

    fn log_output(&self, ctx: &ExecutionContext, pair: &PairResult, id: u64) {
        let result = pair.result.as_deref().unwrap_or("null");
        if result.len() > ctx.config().large_result_chars {
            info!(node = %self.name, id, rtt_ms = pair.rtt_ms(), "Result: too large");
        } else {
            info!(
                node = %self.name,
                id,
                rtt_ms = pair.rtt_ms(),
                "Result: {}",
                ctx.loggable_text(result)
            );
        }
    }

    /// Single invocation without retries or constraints
    async fn invoke_direct(
        &self,
        ctx: &ExecutionContext,
        request: &InvocationRequest,
    ) -> (Attempt, Result<PairResult>) {
        let started_at = Utc::now();
        let clock = Instant::now();
        let result = ctx.gateway().invoke(&request.endpoint, &request.inputs).await;

        let attempt = match &result {
            Ok(pair) => Attempt {
                endpoint: request.endpoint.clone(),
                started_at,
                rtt: pair.rtt,
                result: pair.result.clone(),
                error: None,
            },
            Err(e) => Attempt {
                endpoint: request.endpoint.clone(),
                started_at,
                rtt: clock.elapsed(),
                result: None,
                error: Some(e.to_string()),
            },
        };
        (attempt, result)
    }
}

fn mark_last_failed(mut attempts: Vec<Attempt>, parse_error: Option<&EnactError>) -> Vec<Attempt> {
    if let (Some(e), Some(last)) = (parse_error, attempts.last_mut()) {
        if last.error.is_none() {
            last.error = Some(e.to_string());
        }
    }
    attempts
}

#[async_trait]
impl Node for FunctionNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Function
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn children(&self) -> Vec<Arc<dyn Node>> {
        self.children.clone()
    }

    #[instrument(skip(self, ctx), fields(node = %self.name))]
    async fn call(&self, ctx: &Arc<ExecutionContext>, scope: LoopScope) -> Result<Outcome> {
        let id = next_invocation_id();
        let data_values = self.state.data_values();
        let failed = |outputs: DataValues| Ok(Outcome::failed(Arc::new(outputs)));

        let (request, passed) = match self.prepare(&data_values) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(id, "{}", e);
                return failed(DataValues::new());
            }
        };
        info!(id, resource = %request.endpoint, "Executing function");
        self.log_input(ctx, &request.inputs, id);

        let (attempts, dispatched) = if request.needs_fault_tolerance() {
            let engine = ctx.fault_tolerance().ok_or_else(|| EnactError::NoProvidersConfigured {
                node: self.name.to_string(),
            })?;
            info!(id, providers = ?engine.providers(), "Invoking function with fault tolerance");

            let report = engine.invoke(&request).await;
            (report.attempts, report.outcome)
        } else {
            let (attempt, result) = self.invoke_direct(ctx, &request).await;
            (vec![attempt], result)
        };

        let pair = match dispatched {
            Ok(pair) => pair,
            Err(e) => {
                error!(id, "{}", e);
                self.record_attempts(ctx, id, scope, &attempts);
                return failed(passed);
            }
        };
        self.log_output(ctx, &pair, id);

        // The answering attempt only counts as a success once its result parses
        let mut outputs = passed;
        let parsed = parse_outputs(&self.name, pair.result.as_deref(), &self.outputs, &mut outputs);
        let attempts = mark_last_failed(attempts, parsed.as_ref().err());
        self.record_attempts(ctx, id, scope, &attempts);
        if let Err(e) = parsed {
            error!(id, "{}", e);
            return failed(outputs);
        }

        let outputs = Arc::new(outputs);
        self.state.set_result(Arc::clone(&outputs));
        run_children(ctx, scope, outputs, &self.children).await
    }

    fn duplicate(&self) -> Arc<dyn Node> {
        Arc::new(Self {
            name: Arc::clone(&self.name),
            function_type: Arc::clone(&self.function_type),
            deployment: self.deployment.clone(),
            properties: self.properties.clone(),
            constraints: self.constraints.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            children: duplicate_all(&self.children),
            state: NodeState::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DataType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(pairs: &[(&str, serde_json::Value)]) -> DataValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn resolves_sources_then_literals() {
        let node = FunctionNode::at("sum", "https://x")
            .with_input(DataIn::from_source("a", "split/a", DataType::Number))
            .with_input(DataIn::literal("b", json!("2"), DataType::Number));

        let resolved = node.resolve_inputs(&data(&[("split/a", json!(1))])).unwrap();
        assert_eq!(resolved.actual, data(&[("a", json!(1)), ("b", json!(2.0))]));
        assert!(resolved.passed.is_empty());
    }

    #[test]
    fn source_wins_over_literal() {
        let node = FunctionNode::at("f", "https://x").with_input(DataIn {
            value: Some(json!(0)),
            ..DataIn::from_source("a", "up/a", DataType::Number)
        });
        let resolved = node.resolve_inputs(&data(&[("up/a", json!(9))])).unwrap();
        assert_eq!(resolved.actual["a"], json!(9));
    }

    #[test]
    fn missing_source_without_literal_fails() {
        let node = FunctionNode::at("f", "https://x")
            .with_input(DataIn::from_source("a", "up/a", DataType::Number));
        let err = node.resolve_inputs(&DataValues::new()).unwrap_err();
        assert!(matches!(err, EnactError::MissingInputData { ref source_key, .. } if source_key == "up/a"));
    }

    #[test]
    fn passing_inputs_skip_the_invocation() {
        let node = FunctionNode::at("f", "https://x")
            .with_input(DataIn::from_source("p", "up/p", DataType::String).passing())
            .with_input(DataIn::from_source("r", "up/r", DataType::String).replicated());

        let resolved = node
            .resolve_inputs(&data(&[("up/p", json!("x")), ("up/r", json!("y"))]))
            .unwrap();
        assert_eq!(resolved.actual, data(&[("r", json!("y"))]));
        assert_eq!(resolved.passed, data(&[("f/p", json!("x")), ("f/r", json!("y"))]));
    }

    #[test]
    fn resource_and_services_come_from_properties() {
        let node = FunctionNode::new("f", "t")
            .with_property(SERVICE_PROPERTY, "s3, rekognition")
            .with_property(SERVICE_PROPERTY, "dynamodb");
        assert!(matches!(node.resource_link(), Err(EnactError::MissingResourceLink { .. })));
        assert_eq!(node.used_services(), vec!["s3", "rekognition", "dynamodb"]);
    }

    #[test]
    fn parse_error_fails_only_the_answering_attempt() {
        let attempt = |error: Option<&str>| Attempt {
            endpoint: "https://x".into(),
            started_at: Utc::now(),
            rtt: Duration::from_millis(5),
            result: Some("null".into()),
            error: error.map(String::from),
        };
        let parse_error = EnactError::EmptyResult {
            node: "f".into(),
            expected: 1,
        };

        let marked = mark_last_failed(vec![attempt(Some("HTTP 503")), attempt(None)], Some(&parse_error));
        assert_eq!(marked[0].error.as_deref(), Some("HTTP 503"));
        assert!(marked[1].error.as_deref().is_some_and(|e| e.contains("ENACT-031")));

        let untouched = mark_last_failed(vec![attempt(None)], None);
        assert!(untouched[0].succeeded());
    }

    #[test]
    fn duplicate_has_fresh_state() {
        let node = FunctionNode::at("f", "https://x");
        node.pass_result(Arc::new(data(&[("k", json!(1))])));
        let copy = node.duplicate();
        assert!(copy.data_values().is_empty());
        assert_eq!(copy.name(), "f");
        assert_eq!(node.data_values().len(), 1);
    }
}
