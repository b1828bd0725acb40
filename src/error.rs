//! Error types with fix suggestions
//!
//! Error code ranges:
//! - ENACT-010-019: Node input/declaration errors
//! - ENACT-020-029: Invocation and fault-tolerance errors
//! - ENACT-030-039: Output errors
//! - ENACT-040-049: Credential errors
//! - ENACT-050-059: Workflow description errors
//! - ENACT-060-069: Runtime errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnactError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum EnactError {
    // ═══════════════════════════════════════════
    // NODE ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[ENACT-010] Function '{node}' needs '{source_key}' but no upstream node provided it")]
    MissingInputData { node: String, source_key: String },

    #[error("[ENACT-011] Function '{node}' declares no 'resource' property")]
    MissingResourceLink { node: String },

    #[error("[ENACT-012] Invalid constraint '{name}={value}': {reason}")]
    InvalidConstraint {
        name: String,
        value: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // INVOCATION ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[ENACT-020] Invocation of '{endpoint}' ran {elapsed_ms}ms, limit is {limit_ms}ms")]
    MaxRunningTimeExceeded {
        endpoint: String,
        elapsed_ms: u64,
        limit_ms: u64,
    },

    #[error("[ENACT-021] Invocation of '{endpoint}' could not start before {deadline}")]
    LatestStartingTimeExceeded { endpoint: String, deadline: String },

    #[error("[ENACT-022] Invocation of '{endpoint}' could not finish before {deadline}")]
    LatestFinishingTimeExceeded { endpoint: String, deadline: String },

    #[error("[ENACT-023] Invocation of '{endpoint}' failed: {reason}")]
    InvocationFailure { endpoint: String, reason: String },

    #[error("[ENACT-024] All {attempts} attempts failed, last error: {last_error}")]
    FailoverExhausted { attempts: u32, last_error: String },

    #[error("[ENACT-025] Function '{node}' requires fault tolerance but no provider account is configured")]
    NoProvidersConfigured { node: String },

    // ═══════════════════════════════════════════
    // OUTPUT ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[ENACT-030] Output '{output}' of '{node}' is not a valid {expected}")]
    OutputCoercion {
        node: String,
        output: String,
        expected: String,
    },

    #[error("[ENACT-031] Function '{node}' returned no result but declares {expected} output(s)")]
    EmptyResult { node: String, expected: usize },

    #[error("[ENACT-032] Function '{node}' reported an error: {message}")]
    FunctionReportedError { node: String, message: String },

    // ═══════════════════════════════════════════
    // CREDENTIAL ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[ENACT-040] Credentials at '{path}' unavailable: {reason}")]
    CredentialsUnavailable { path: String, reason: String },

    // ═══════════════════════════════════════════
    // WORKFLOW ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[ENACT-050] Invalid workflow: {reason}")]
    InvalidWorkflow { reason: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // ═══════════════════════════════════════════
    // RUNTIME ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[ENACT-060] Branch starting at '{node}' panicked: {reason}")]
    TaskPanicked { node: String, reason: String },
}

impl EnactError {
    /// Errors that a different provider (or a later attempt) may not hit again.
    ///
    /// Of the three timing violations only `C-maxRunningTime` fails over.
    /// `LatestStartingTimeExceeded` and `LatestFinishingTimeExceeded` are
    /// terminal: the deadline is an absolute instant that has already passed
    /// (or cannot be met), and every alternative would start even later.
    pub fn allows_failover(&self) -> bool {
        match self {
            EnactError::MaxRunningTimeExceeded { .. } | EnactError::InvocationFailure { .. } => true,
            // Absolute deadlines: no alternative can meet them once missed
            EnactError::LatestStartingTimeExceeded { .. }
            | EnactError::LatestFinishingTimeExceeded { .. } => false,
            _ => false,
        }
    }

    /// Check if this error is one of the three timing-constraint violations
    pub fn is_timing_violation(&self) -> bool {
        matches!(
            self,
            EnactError::MaxRunningTimeExceeded { .. }
                | EnactError::LatestStartingTimeExceeded { .. }
                | EnactError::LatestFinishingTimeExceeded { .. }
        )
    }
}

impl FixSuggestion for EnactError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            EnactError::MissingInputData { .. } => {
                Some("Check the input 'source' matches an upstream output key, or give it a literal 'value'")
            }
            EnactError::MissingResourceLink { .. } => {
                Some("Add a property 'resource' with the function URL to the function")
            }
            EnactError::InvalidConstraint { .. } => {
                Some("Use milliseconds for C-maxRunningTime and 'YYYY-MM-DD HH:MM:SS' for deadlines")
            }
            EnactError::MaxRunningTimeExceeded { .. } => {
                Some("Raise C-maxRunningTime or add an FT-AltStrat-alternative on a faster provider")
            }
            EnactError::LatestStartingTimeExceeded { .. } => {
                Some("Move C-latestStartingTime later or shorten upstream functions")
            }
            EnactError::LatestFinishingTimeExceeded { .. } => {
                Some("Move C-latestFinishingTime later")
            }
            EnactError::InvocationFailure { .. } => {
                Some("Check the function URL is reachable and the credentials are valid")
            }
            EnactError::FailoverExhausted { .. } => {
                Some("Increase FT-Retries or configure more provider accounts")
            }
            EnactError::NoProvidersConfigured { .. } => {
                Some("Add provider keys to credentials.properties (aws_access_key_id, google_sa_key, azure_key, ibm_api_key)")
            }
            EnactError::OutputCoercion { .. } => {
                Some("Make the function return the declared type or fix the output 'type'")
            }
            EnactError::EmptyResult { .. } => {
                Some("Make the function return a JSON object with the declared outputs")
            }
            EnactError::FunctionReportedError { .. } => {
                Some("Inspect the function's own logs; the payload carried an 'error' field")
            }
            EnactError::CredentialsUnavailable { .. } => {
                Some("Pass --credentials <file> or set ENACTOR_CREDENTIALS")
            }
            EnactError::InvalidWorkflow { .. } => Some("Check the workflow node tree structure"),
            EnactError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            EnactError::Json(_) => Some("Check the input file is valid JSON"),
            EnactError::Io(_) => Some("Check file path and permissions"),
            EnactError::Http(_) => Some("Check TLS setup and proxy environment variables"),
            EnactError::TaskPanicked { .. } => None,
        }
    }
}
