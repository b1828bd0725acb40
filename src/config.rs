//! Engine configuration and credential loading
//!
//! ## Credential lookup (highest to lowest)
//!
//! 1. `--credentials <file>` on the command line
//! 2. `ENACTOR_CREDENTIALS` environment variable
//! 3. `credentials.properties` in the working directory
//!
//! The credentials file is a `key=value` properties file. A provider whose
//! keys are missing is left unconfigured; an unreadable file degrades to an
//! empty account set instead of aborting the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::EnactError;
use crate::provider::{AwsAccount, AzureAccount, GoogleAccount, IbmAccount, ProviderAccounts};

/// Default credentials file name
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.properties";

/// Environment variable overriding the credentials path
pub const CREDENTIALS_ENV: &str = "ENACTOR_CREDENTIALS";

/// Engine-wide tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Redact credential-looking values from logged inputs and results
    pub hide_credentials: bool,
    /// Inputs with more entries than this are logged as "large"
    pub large_input_entries: usize,
    /// Results longer than this are logged as "too large"
    pub large_result_chars: usize,
    /// Overall HTTP timeout for one invocation
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Backoff between retries of the same endpoint
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hide_credentials: false,
            large_input_entries: 20,
            large_result_chars: 100_000,
            request_timeout_secs: 900,
            connect_timeout_secs: 10,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn hide_credentials(mut self, hide: bool) -> Self {
        self.hide_credentials = hide;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Resolve which credentials file to read
pub fn credentials_path(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }
    std::env::var(CREDENTIALS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CREDENTIALS_FILE))
}

/// Load provider accounts, logging (not propagating) read failures
pub fn load_accounts(path: &Path) -> ProviderAccounts {
    match read_accounts(path) {
        Ok(accounts) => {
            debug!(
                path = %path.display(),
                providers = ?accounts.configured(),
                "Loaded provider accounts"
            );
            accounts
        }
        Err(e) => {
            error!("{}", e);
            ProviderAccounts::default()
        }
    }
}

/// Read provider accounts from a properties file
pub fn read_accounts(path: &Path) -> Result<ProviderAccounts, EnactError> {
    let unavailable = |reason: String| EnactError::CredentialsUnavailable {
        path: path.display().to_string(),
        reason,
    };

    let entries = dotenvy::from_path_iter(path).map_err(|e| unavailable(e.to_string()))?;

    let mut props = std::collections::HashMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(|e| unavailable(e.to_string()))?;
        props.insert(key, value);
    }

    Ok(accounts_from_properties(&props))
}

fn accounts_from_properties(props: &std::collections::HashMap<String, String>) -> ProviderAccounts {
    let get = |key: &str| props.get(key).filter(|v| !v.trim().is_empty()).cloned();

    let aws = match (get("aws_access_key_id"), get("aws_secret_access_key")) {
        (Some(access_key), Some(secret_key)) => Some(AwsAccount {
            access_key,
            secret_key,
            session_token: get("aws_session_token"),
        }),
        (None, None) => None,
        _ => {
            warn!("Ignoring incomplete AWS credentials (need access key and secret key)");
            None
        }
    };

    ProviderAccounts {
        google: get("google_sa_key").map(|service_account_key| GoogleAccount { service_account_key }),
        azure: get("azure_key").map(|function_key| AzureAccount { function_key }),
        aws,
        ibm: get("ibm_api_key").map(|api_key| IbmAccount { api_key }),
    }
}
