//! Shared execution context
//!
//! One [`ExecutionContext`] is built per workflow run and shared (behind an
//! `Arc`) by every node call. It owns no per-node state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::event_log::{EventKind, EventLog, InvocationRecord, RunKind};
use crate::invocation::{Backoff, FaultToleranceEngine, Gateway};
use crate::node::DataValues;
use crate::provider::ProviderAccounts;

const REDACTED: &str = "****";

/// Key fragments that mark a value as a credential
const SENSITIVE_KEYS: [&str; 4] = ["key", "secret", "token", "password"];

/// Simulated round-trip time of external services a function uses.
///
/// Subtracted from the measured RTT of successful invocations so that
/// recorded times reflect the function alone.
pub trait ServiceRttModel: Send + Sync {
    fn services_rtt(&self, region: &str, services: &[String]) -> Duration;
}

/// Model for functions that use no external services
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServiceRtt;

impl ServiceRttModel for NoServiceRtt {
    fn services_rtt(&self, _region: &str, _services: &[String]) -> Duration {
        Duration::ZERO
    }
}

pub struct ExecutionContext {
    gateway: Arc<dyn Gateway>,
    fault_tolerance: Option<FaultToleranceEngine>,
    accounts: Arc<ProviderAccounts>,
    event_log: EventLog,
    config: EngineConfig,
    service_rtt: Arc<dyn ServiceRttModel>,
    execution_id: Option<u64>,
    run_kind: RunKind,
}

impl ExecutionContext {
    pub fn builder(gateway: Arc<dyn Gateway>) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            gateway,
            accounts: ProviderAccounts::default(),
            event_log: EventLog::new(),
            config: EngineConfig::default(),
            service_rtt: Arc::new(NoServiceRtt),
            execution_id: None,
            run_kind: RunKind::Exec,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// `None` when no provider account is loaded
    pub fn fault_tolerance(&self) -> Option<&FaultToleranceEngine> {
        self.fault_tolerance.as_ref()
    }

    pub fn accounts(&self) -> &ProviderAccounts {
        &self.accounts
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn service_rtt(&self) -> &dyn ServiceRttModel {
        self.service_rtt.as_ref()
    }

    /// `None` disables invocation records
    pub fn execution_id(&self) -> Option<u64> {
        self.execution_id
    }

    pub fn run_kind(&self) -> RunKind {
        self.run_kind
    }

    /// Emit an invocation record when recording is enabled.
    ///
    /// `build` receives the execution id and is not called otherwise.
    pub fn record(&self, build: impl FnOnce(u64) -> InvocationRecord) {
        if let Some(execution_id) = self.execution_id {
            // EMIT: FunctionEnd / FunctionFailed
            self.event_log.emit(EventKind::for_record(build(execution_id)));
        }
    }

    /// Input mapping as it may appear in logs
    pub fn loggable_inputs(&self, inputs: &DataValues) -> Value {
        let map: Map<String, Value> = inputs
            .iter()
            .map(|(key, value)| {
                let value = if self.config.hide_credentials && is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(map)
    }

    /// Result text as it may appear in logs
    pub fn loggable_text(&self, text: &str) -> String {
        if !self.config.hide_credentials {
            return text.to_string();
        }
        self.accounts
            .secrets()
            .into_iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|fragment| key.contains(fragment))
}

pub struct ExecutionContextBuilder {
    gateway: Arc<dyn Gateway>,
    accounts: ProviderAccounts,
    event_log: EventLog,
    config: EngineConfig,
    service_rtt: Arc<dyn ServiceRttModel>,
    execution_id: Option<u64>,
    run_kind: RunKind,
}

impl ExecutionContextBuilder {
    pub fn accounts(mut self, accounts: ProviderAccounts) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn service_rtt(mut self, model: Arc<dyn ServiceRttModel>) -> Self {
        self.service_rtt = model;
        self
    }

    pub fn execution_id(mut self, id: u64) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn run_kind(mut self, kind: RunKind) -> Self {
        self.run_kind = kind;
        self
    }

    pub fn build(self) -> Arc<ExecutionContext> {
        let accounts = Arc::new(self.accounts);
        let fault_tolerance = FaultToleranceEngine::new(
            Arc::clone(&self.gateway),
            Arc::clone(&accounts),
            Backoff::from_config(&self.config),
        );

        Arc::new(ExecutionContext {
            gateway: self.gateway,
            fault_tolerance,
            accounts,
            event_log: self.event_log,
            config: self.config,
            service_rtt: self.service_rtt,
            execution_id: self.execution_id,
            run_kind: self.run_kind,
        })
    }
}
