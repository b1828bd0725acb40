//! Timing constraints and fault-tolerance settings of a function node
//!
//! Constraints arrive as plain `name=value` pairs on the node. This module
//! turns them into typed settings and enforces the three timing constraints
//! around a single invocation attempt:
//!
//! - `C-maxRunningTime` (milliseconds): the attempt is cancelled once the
//!   limit elapses, and a completed attempt is rejected if it still ran longer
//! - `C-latestStartingTime`: checked before dispatch
//! - `C-latestFinishingTime`: the attempt is cancelled at the deadline
//!
//! Deadlines accept RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff]` (read as UTC).

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use super::PairResult;
use crate::ast::PropertyConstraint;
use crate::error::{EnactError, Result};

pub const MAX_RUNNING_TIME: &str = "C-maxRunningTime";
pub const LATEST_STARTING_TIME: &str = "C-latestStartingTime";
pub const LATEST_FINISHING_TIME: &str = "C-latestFinishingTime";
pub const FT_RETRIES: &str = "FT-Retries";
pub const FT_ALTERNATIVE: &str = "FT-AltStrat-alternative";

const FT_PREFIX: &str = "FT-";

/// The three timing constraints, all optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingConstraints {
    pub max_running_time: Option<Duration>,
    pub latest_start: Option<DateTime<Utc>>,
    pub latest_finish: Option<DateTime<Utc>>,
}

/// Retry and failover settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultToleranceSettings {
    /// Extra attempts per candidate endpoint after the first one fails
    pub retries: u32,
    /// Equivalent deployments of the same function, in preference order
    pub alternatives: Vec<String>,
}

/// Everything a node's constraint list declares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredConstraints {
    pub timing: TimingConstraints,
    pub fault_tolerance: Option<FaultToleranceSettings>,
}

impl DeclaredConstraints {
    pub fn parse(constraints: &[PropertyConstraint]) -> Result<Self> {
        let mut declared = Self::default();

        for constraint in constraints {
            let name = constraint.name.as_str();
            match name {
                MAX_RUNNING_TIME => {
                    declared.timing.max_running_time = Some(parse_millis(constraint)?);
                }
                LATEST_STARTING_TIME => {
                    declared.timing.latest_start = Some(parse_deadline(constraint)?);
                }
                LATEST_FINISHING_TIME => {
                    declared.timing.latest_finish = Some(parse_deadline(constraint)?);
                }
                FT_RETRIES => {
                    let retries = constraint.value.trim().parse().map_err(|_| {
                        invalid(constraint, "expected a non-negative integer")
                    })?;
                    declared.settings_mut().retries = retries;
                }
                FT_ALTERNATIVE => {
                    let endpoint = constraint.value.trim();
                    if endpoint.is_empty() {
                        return Err(invalid(constraint, "alternative endpoint is empty"));
                    }
                    declared.settings_mut().alternatives.push(endpoint.to_string());
                }
                _ if name.starts_with(FT_PREFIX) => {
                    debug!(constraint = name, "Unsupported fault-tolerance setting, enabling defaults");
                    declared.settings_mut();
                }
                _ => warn!(constraint = name, "Ignoring unknown constraint"),
            }
        }

        Ok(declared)
    }

    /// Any constraint at all routes the invocation through the fault-tolerance engine
    pub fn needs_fault_tolerance(&self) -> bool {
        self.fault_tolerance.is_some() || !self.timing.is_empty()
    }

    fn settings_mut(&mut self) -> &mut FaultToleranceSettings {
        self.fault_tolerance.get_or_insert_with(FaultToleranceSettings::default)
    }
}

fn invalid(constraint: &PropertyConstraint, reason: impl Into<String>) -> EnactError {
    EnactError::InvalidConstraint {
        name: constraint.name.clone(),
        value: constraint.value.clone(),
        reason: reason.into(),
    }
}

fn parse_millis(constraint: &PropertyConstraint) -> Result<Duration> {
    constraint
        .value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(constraint, "expected milliseconds"))
}

fn parse_deadline(constraint: &PropertyConstraint) -> Result<DateTime<Utc>> {
    let value = constraint.value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| invalid(constraint, e.to_string()))
}

/// Which constraint bounds the wait for an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    RunningTime(Duration),
    FinishDeadline(DateTime<Utc>),
}

impl TimingConstraints {
    pub fn is_empty(&self) -> bool {
        self.max_running_time.is_none() && self.latest_start.is_none() && self.latest_finish.is_none()
    }

    /// Run one attempt under the constraints.
    ///
    /// The attempt future is dropped (cancelled) as soon as the tighter of
    /// `C-maxRunningTime` and `C-latestFinishingTime` is reached.
    pub async fn enforce<F>(&self, endpoint: &str, attempt: F) -> Result<PairResult>
    where
        F: Future<Output = Result<PairResult>>,
    {
        let started_at = Utc::now();
        if let Some(deadline) = self.latest_start {
            if started_at > deadline {
                return Err(EnactError::LatestStartingTimeExceeded {
                    endpoint: endpoint.to_string(),
                    deadline: deadline.to_rfc3339(),
                });
            }
        }

        let clock = Instant::now();
        let pair = match self.tightest_bound(started_at) {
            Some((budget, bound)) => match tokio::time::timeout(budget, attempt).await {
                Ok(result) => result?,
                Err(_) => return Err(self.violation(bound, endpoint, clock.elapsed())),
            },
            None => attempt.await?,
        };

        self.check_completion(endpoint, clock.elapsed(), Utc::now())?;
        Ok(pair)
    }

    /// Reject a completed attempt whose measured duration or finish time broke a constraint
    pub fn check_completion(
        &self,
        endpoint: &str,
        elapsed: Duration,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(limit) = self.max_running_time {
            if elapsed > limit {
                return Err(self.violation(Bound::RunningTime(limit), endpoint, elapsed));
            }
        }
        if let Some(deadline) = self.latest_finish {
            if finished_at > deadline {
                return Err(self.violation(Bound::FinishDeadline(deadline), endpoint, elapsed));
            }
        }
        Ok(())
    }

    fn tightest_bound(&self, now: DateTime<Utc>) -> Option<(Duration, Bound)> {
        let running = self
            .max_running_time
            .map(|limit| (limit, Bound::RunningTime(limit)));
        let finishing = self.latest_finish.map(|deadline| {
            let left = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            (left, Bound::FinishDeadline(deadline))
        });

        match (running, finishing) {
            (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    fn violation(&self, bound: Bound, endpoint: &str, elapsed: Duration) -> EnactError {
        match bound {
            Bound::RunningTime(limit) => EnactError::MaxRunningTimeExceeded {
                endpoint: endpoint.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: limit.as_millis() as u64,
            },
            Bound::FinishDeadline(deadline) => EnactError::LatestFinishingTimeExceeded {
                endpoint: endpoint.to_string(),
                deadline: deadline.to_rfc3339(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn constraint(name: &str, value: &str) -> PropertyConstraint {
        PropertyConstraint::new(name, value)
    }

    fn ok_pair() -> PairResult {
        PairResult::new(Some("{}".into()), Duration::from_millis(1))
    }

    #[test]
    fn parses_full_vocabulary() {
        let declared = DeclaredConstraints::parse(&[
            constraint(MAX_RUNNING_TIME, "1000"),
            constraint(LATEST_STARTING_TIME, "2030-01-01 10:00:00"),
            constraint(LATEST_FINISHING_TIME, "2030-01-01T11:00:00Z"),
            constraint(FT_RETRIES, "2"),
            constraint(FT_ALTERNATIVE, "https://a.azurewebsites.net/api/f"),
            constraint(FT_ALTERNATIVE, "https://b.azurewebsites.net/api/f"),
        ])
        .unwrap();

        assert_eq!(declared.timing.max_running_time, Some(Duration::from_millis(1000)));
        assert_eq!(
            declared.timing.latest_start.unwrap().to_rfc3339(),
            "2030-01-01T10:00:00+00:00"
        );
        let ft = declared.fault_tolerance.unwrap();
        assert_eq!(ft.retries, 2);
        assert_eq!(ft.alternatives.len(), 2);
    }

    #[test]
    fn no_constraints_means_direct_path() {
        let declared = DeclaredConstraints::parse(&[constraint("C-unknown", "1")]).unwrap();
        assert!(!declared.needs_fault_tolerance());
        assert!(DeclaredConstraints::parse(&[constraint(MAX_RUNNING_TIME, "5")])
            .unwrap()
            .needs_fault_tolerance());
        assert!(DeclaredConstraints::parse(&[constraint("FT-Something", "x")])
            .unwrap()
            .needs_fault_tolerance());
    }

    #[test]
    fn rejects_malformed_values() {
        let err = DeclaredConstraints::parse(&[constraint(MAX_RUNNING_TIME, "soon")]).unwrap_err();
        assert!(matches!(err, EnactError::InvalidConstraint { .. }));
        assert!(DeclaredConstraints::parse(&[constraint(LATEST_FINISHING_TIME, "tomorrow")]).is_err());
        assert!(DeclaredConstraints::parse(&[constraint(FT_RETRIES, "-1")]).is_err());
    }

    #[tokio::test]
    async fn passes_fast_attempt() {
        let timing = TimingConstraints {
            max_running_time: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let result = timing.enforce("e", async { Ok(ok_pair()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancels_slow_attempt_at_running_time_limit() {
        let timing = TimingConstraints {
            max_running_time: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let started = Instant::now();
        let err = timing
            .enforce("e", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ok_pair())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EnactError::MaxRunningTimeExceeded { limit_ms: 50, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn start_deadline_in_the_past_never_dispatches() {
        let timing = TimingConstraints {
            latest_start: Some(Utc::now() - ChronoDuration::seconds(1)),
            ..Default::default()
        };
        let err = timing
            .enforce("e", async { Ok(ok_pair()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EnactError::LatestStartingTimeExceeded { .. }));
    }

    #[tokio::test]
    async fn finish_deadline_tighter_than_running_time_wins() {
        let timing = TimingConstraints {
            max_running_time: Some(Duration::from_secs(10)),
            latest_finish: Some(Utc::now() + ChronoDuration::milliseconds(50)),
            ..Default::default()
        };
        let err = timing
            .enforce("e", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ok_pair())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EnactError::LatestFinishingTimeExceeded { .. }));
    }

    #[test]
    fn completion_check_uses_measured_duration() {
        let timing = TimingConstraints {
            max_running_time: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        assert!(timing
            .check_completion("e", Duration::from_millis(99), Utc::now())
            .is_ok());
        assert!(timing
            .check_completion("e", Duration::from_millis(101), Utc::now())
            .is_err());
    }
}
