//! Scripted gateway for tests and dry runs
//!
//! Replies are looked up per endpoint: queued one-shot replies first, then
//! the endpoint's handler or sticky reply, then the gateway default.
//! Every call is recorded before the configured delay starts, so calls that
//! were cancelled by a timing constraint still show up.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Gateway, PairResult};
use crate::error::{EnactError, Result};
use crate::node::DataValues;

/// What the mock returns for one call
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Successful invocation with this raw body (`None` = empty body)
    Payload(Option<String>),
    /// Transport-level failure
    Failure(String),
}

impl MockReply {
    pub fn payload(body: impl Into<String>) -> Self {
        Self::Payload(Some(body.into()))
    }
}

/// A call the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub inputs: DataValues,
}

type Handler = Arc<dyn Fn(&DataValues) -> MockReply + Send + Sync>;

#[derive(Default)]
struct Script {
    queued: VecDeque<MockReply>,
    sticky: Option<MockReply>,
    handler: Option<Handler>,
    delay: Duration,
}

/// Gateway that never touches the network
pub struct MockGateway {
    scripts: Mutex<HashMap<String, Script>>,
    default_reply: MockReply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGateway {
    /// Every endpoint answers `{}` until scripted otherwise
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_reply: MockReply::payload("{}"),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Always answer this endpoint with `body`
    pub fn respond(mut self, endpoint: impl Into<String>, body: impl Into<String>) -> Self {
        self.script(endpoint).sticky = Some(MockReply::payload(body));
        self
    }

    /// Always fail calls to this endpoint
    pub fn fail(mut self, endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        self.script(endpoint).sticky = Some(MockReply::Failure(reason.into()));
        self
    }

    /// Compute the reply from the inputs of each call
    pub fn handle<F>(mut self, endpoint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&DataValues) -> MockReply + Send + Sync + 'static,
    {
        self.script(endpoint).handler = Some(Arc::new(handler));
        self
    }

    /// Delay every reply of this endpoint
    pub fn with_delay(mut self, endpoint: impl Into<String>, delay: Duration) -> Self {
        self.script(endpoint).delay = delay;
        self
    }

    /// Queue a one-shot reply (FIFO, consumed before sticky replies)
    pub fn queue(&self, endpoint: impl Into<String>, reply: MockReply) {
        self.scripts
            .lock()
            .entry(endpoint.into())
            .or_default()
            .queued
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.endpoint == endpoint).count()
    }

    fn script(&mut self, endpoint: impl Into<String>) -> &mut Script {
        self.scripts.get_mut().entry(endpoint.into()).or_default()
    }

    fn next_reply(&self, endpoint: &str, inputs: &DataValues) -> (MockReply, Duration) {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(endpoint) {
            Some(script) => {
                let reply = script
                    .queued
                    .pop_front()
                    .or_else(|| script.handler.as_ref().map(|h| h(inputs)))
                    .or_else(|| script.sticky.clone())
                    .unwrap_or_else(|| self.default_reply.clone());
                (reply, script.delay)
            }
            None => (self.default_reply.clone(), Duration::ZERO),
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn invoke(&self, endpoint: &str, inputs: &DataValues) -> Result<PairResult> {
        self.calls.lock().push(RecordedCall {
            endpoint: endpoint.to_string(),
            inputs: inputs.clone(),
        });

        let (reply, delay) = self.next_reply(endpoint, inputs);
        let clock = Instant::now();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::Payload(body) => Ok(PairResult::new(body, clock.elapsed())),
            MockReply::Failure(reason) => Err(EnactError::InvocationFailure {
                endpoint: endpoint.to_string(),
                reason,
            }),
        }
    }
}
