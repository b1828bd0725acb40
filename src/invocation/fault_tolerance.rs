//! Retry and failover for constrained invocations
//!
//! Candidates are tried in order: the node's own endpoint first, then each
//! `FT-AltStrat-alternative` whose provider has an account loaded. Each
//! candidate gets `1 + FT-Retries` attempts, spaced by [`Backoff`]. Every
//! attempt runs under the node's timing constraints.
//!
//! Running-time violations and plain invocation failures move on to the
//! next attempt. Start and finish deadlines are absolute, so they end the
//! invocation immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use super::{Backoff, Gateway, InvocationRequest, PairResult};
use crate::error::{EnactError, Result};
use crate::output;
use crate::provider::{detect_provider, Provider, ProviderAccounts};

/// One dispatch to one endpoint
#[derive(Debug, Clone)]
pub struct Attempt {
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub rtt: Duration,
    pub result: Option<String>,
    /// Why the attempt failed, `None` on success
    pub error: Option<String>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every attempt made for one invocation, plus how it ended
#[derive(Debug)]
pub struct FailoverReport {
    pub attempts: Vec<Attempt>,
    pub outcome: Result<PairResult>,
}

/// Failover policy over whichever providers have accounts loaded
pub struct FaultToleranceEngine {
    gateway: Arc<dyn Gateway>,
    accounts: Arc<ProviderAccounts>,
    backoff: Backoff,
}

impl FaultToleranceEngine {
    /// `None` when no provider account is configured
    pub fn new(
        gateway: Arc<dyn Gateway>,
        accounts: Arc<ProviderAccounts>,
        backoff: Backoff,
    ) -> Option<Self> {
        if accounts.is_empty() {
            return None;
        }
        Some(Self {
            gateway,
            accounts,
            backoff,
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.accounts.configured()
    }

    /// Endpoints to try, in order, without duplicates
    pub fn candidates(&self, request: &InvocationRequest) -> Vec<String> {
        let mut candidates = vec![request.endpoint.clone()];
        let alternatives = request
            .constraints
            .fault_tolerance
            .as_ref()
            .map(|ft| ft.alternatives.as_slice())
            .unwrap_or_default();

        for alternative in alternatives {
            if candidates.contains(alternative) {
                continue;
            }
            match detect_provider(alternative) {
                Some(provider) if !self.accounts.has(provider) => {
                    warn!(
                        endpoint = %alternative,
                        %provider,
                        "Skipping alternative, no account for provider"
                    );
                }
                _ => candidates.push(alternative.clone()),
            }
        }
        candidates
    }

    #[instrument(skip_all, fields(node = %request.node_name))]
    pub async fn invoke(&self, request: &InvocationRequest) -> FailoverReport {
        let retries = request
            .constraints
            .fault_tolerance
            .as_ref()
            .map(|ft| ft.retries)
            .unwrap_or(0);
        let timing = &request.constraints.timing;

        let mut attempts = Vec::new();
        let mut last_error = None;

        for (index, endpoint) in self.candidates(request).into_iter().enumerate() {
            if index > 0 {
                warn!(endpoint = %endpoint, "Failing over to alternative endpoint");
            }

            for attempt in 0..=retries {
                let started_at = Utc::now();
                let clock = Instant::now();
                let result = timing
                    .enforce(&endpoint, self.gateway.invoke(&endpoint, &request.inputs))
                    .await
                    .and_then(|pair| reject_error_payload(&endpoint, pair));

                match result {
                    Ok(pair) => {
                        attempts.push(Attempt {
                            endpoint,
                            started_at,
                            rtt: pair.rtt,
                            result: pair.result.clone(),
                            error: None,
                        });
                        if attempts.len() > 1 {
                            info!(attempts = attempts.len(), "Invocation recovered");
                        }
                        return FailoverReport {
                            attempts,
                            outcome: Ok(pair),
                        };
                    }
                    Err(e) => {
                        attempts.push(Attempt {
                            endpoint: endpoint.clone(),
                            started_at,
                            rtt: clock.elapsed(),
                            result: None,
                            error: Some(e.to_string()),
                        });

                        if !e.allows_failover() {
                            return FailoverReport {
                                attempts,
                                outcome: Err(e),
                            };
                        }

                        warn!(endpoint = %endpoint, attempt = attempt + 1, error = %e, "Invocation attempt failed");
                        last_error = Some(e);

                        if attempt < retries {
                            tokio::time::sleep(self.backoff.delay(attempt)).await;
                        }
                    }
                }
            }
        }

        let outcome = match last_error {
            Some(e) if attempts.len() == 1 => Err(e),
            Some(e) => Err(EnactError::FailoverExhausted {
                attempts: attempts.len() as u32,
                last_error: e.to_string(),
            }),
            None => Err(EnactError::InvocationFailure {
                endpoint: request.endpoint.clone(),
                reason: "no candidate endpoint".to_string(),
            }),
        };
        FailoverReport { attempts, outcome }
    }
}

/// A payload carrying an error marker is a failed attempt worth retrying
fn reject_error_payload(endpoint: &str, pair: PairResult) -> Result<PairResult> {
    match output::error_marker(pair.result.as_deref()) {
        Some(message) => Err(EnactError::InvocationFailure {
            endpoint: endpoint.to_string(),
            reason: format!("function reported an error: {}", message),
        }),
        None => Ok(pair),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PropertyConstraint;
    use crate::invocation::{DeclaredConstraints, MockGateway, MockReply, FT_ALTERNATIVE, FT_RETRIES, MAX_RUNNING_TIME};
    use crate::node::DataValues;

    const PRIMARY: &str = "https://primary.azurewebsites.net/api/f";
    const BACKUP: &str = "https://us-central1-demo.cloudfunctions.net/f";

    fn engine(mock: Arc<MockGateway>, accounts: ProviderAccounts) -> FaultToleranceEngine {
        FaultToleranceEngine::new(mock, Arc::new(accounts), Backoff::none()).unwrap()
    }

    fn request(constraints: &[(&str, &str)]) -> InvocationRequest {
        let constraints: Vec<_> = constraints
            .iter()
            .map(|(n, v)| PropertyConstraint::new(*n, *v))
            .collect();
        InvocationRequest {
            node_name: "f".into(),
            endpoint: PRIMARY.into(),
            inputs: DataValues::new(),
            deployment: None,
            constraints: DeclaredConstraints::parse(&constraints).unwrap(),
        }
    }

    #[test]
    fn no_accounts_no_engine() {
        let mock = Arc::new(MockGateway::new());
        assert!(FaultToleranceEngine::new(mock, Arc::new(ProviderAccounts::new()), Backoff::none()).is_none());
    }

    #[test]
    fn alternatives_without_account_are_skipped() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(mock, ProviderAccounts::new().with_azure("k"));
        let req = request(&[(FT_ALTERNATIVE, BACKUP), (FT_ALTERNATIVE, PRIMARY)]);
        assert_eq!(engine.candidates(&req), vec![PRIMARY.to_string()]);
    }

    #[tokio::test]
    async fn retries_same_endpoint_then_succeeds() {
        let mock = Arc::new(MockGateway::new().respond(PRIMARY, r#"{"ok":true}"#));
        mock.queue(PRIMARY, MockReply::Failure("503".into()));
        let engine = engine(Arc::clone(&mock), ProviderAccounts::new().with_azure("k"));

        let report = engine.invoke(&request(&[(FT_RETRIES, "1")])).await;
        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].succeeded());
        assert!(report.attempts[1].succeeded());
    }

    #[tokio::test]
    async fn slow_primary_fails_over_to_second_provider() {
        let mock = Arc::new(
            MockGateway::new()
                .with_delay(PRIMARY, Duration::from_millis(2000))
                .respond(BACKUP, r#"{"ok":true}"#),
        );
        let engine = engine(
            Arc::clone(&mock),
            ProviderAccounts::new().with_azure("k").with_google("g"),
        );

        let report = engine
            .invoke(&request(&[(MAX_RUNNING_TIME, "1000"), (FT_ALTERNATIVE, BACKUP)]))
            .await;

        let pair = report.outcome.unwrap();
        assert_eq!(pair.result.as_deref(), Some(r#"{"ok":true}"#));
        assert_eq!(report.attempts[0].endpoint, PRIMARY);
        assert!(report.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("ENACT-020"));
        assert_eq!(mock.calls_to(BACKUP), 1);
    }

    #[tokio::test]
    async fn slow_primary_without_alternative_fails_with_running_time() {
        let mock = Arc::new(MockGateway::new().with_delay(PRIMARY, Duration::from_millis(2000)));
        let engine = engine(mock, ProviderAccounts::new().with_azure("k"));

        let report = engine.invoke(&request(&[(MAX_RUNNING_TIME, "1000")])).await;
        assert!(matches!(
            report.outcome,
            Err(EnactError::MaxRunningTimeExceeded { limit_ms: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn exhausted_candidates_report_every_attempt() {
        let mock = Arc::new(MockGateway::new().fail(PRIMARY, "down").fail(BACKUP, "down"));
        let engine = engine(
            Arc::clone(&mock),
            ProviderAccounts::new().with_azure("k").with_google("g"),
        );

        let report = engine
            .invoke(&request(&[(FT_RETRIES, "1"), (FT_ALTERNATIVE, BACKUP)]))
            .await;
        assert!(matches!(
            report.outcome,
            Err(EnactError::FailoverExhausted { attempts: 4, .. })
        ));
        assert_eq!(mock.calls().len(), 4);
    }

    #[tokio::test]
    async fn error_payload_triggers_failover() {
        let mock = Arc::new(
            MockGateway::new()
                .respond(PRIMARY, r#"{"error":"boom"}"#)
                .respond(BACKUP, r#"{"ok":1}"#),
        );
        let engine = engine(
            Arc::clone(&mock),
            ProviderAccounts::new().with_azure("k").with_google("g"),
        );

        let report = engine.invoke(&request(&[(FT_ALTERNATIVE, BACKUP)])).await;
        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn missed_start_deadline_does_not_fail_over() {
        let mock = Arc::new(MockGateway::new());
        let engine = engine(
            Arc::clone(&mock),
            ProviderAccounts::new().with_azure("k").with_google("g"),
        );

        let report = engine
            .invoke(&request(&[
                ("C-latestStartingTime", "2000-01-01 00:00:00"),
                (FT_ALTERNATIVE, BACKUP),
            ]))
            .await;
        assert!(matches!(
            report.outcome,
            Err(EnactError::LatestStartingTimeExceeded { .. })
        ));
        assert!(mock.calls().is_empty());
    }
}
