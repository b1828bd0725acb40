//! Transport seam for invoking a deployed function

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use super::PairResult;
use crate::config::EngineConfig;
use crate::error::{EnactError, Result};
use crate::node::DataValues;
use crate::provider::{detect_provider, ProviderAccounts};

/// Body excerpt kept in error messages
const ERROR_BODY_CHARS: usize = 200;

/// Something that can invoke a function endpoint with a JSON input object
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn invoke(&self, endpoint: &str, inputs: &DataValues) -> Result<PairResult>;
}

/// Invokes HTTP(S) function triggers with reqwest.
///
/// The input mapping is POSTed as a JSON object; the response body is the
/// raw result. Credentials of the provider detected from the URL are
/// attached to the request.
pub struct HttpGateway {
    client: reqwest::Client,
    accounts: Arc<ProviderAccounts>,
}

impl HttpGateway {
    pub fn new(config: &EngineConfig, accounts: Arc<ProviderAccounts>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(concat!("enactor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, accounts })
    }
}

fn failure(endpoint: &str, reason: impl Into<String>) -> EnactError {
    EnactError::InvocationFailure {
        endpoint: endpoint.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    async fn invoke(&self, endpoint: &str, inputs: &DataValues) -> Result<PairResult> {
        let url = Url::parse(endpoint).map_err(|e| failure(endpoint, format!("invalid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(failure(
                endpoint,
                format!("unsupported endpoint scheme '{}'", url.scheme()),
            ));
        }

        let request = self
            .accounts
            .authorize(detect_provider(endpoint), self.client.post(url).json(inputs));

        let clock = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| failure(endpoint, format!("HTTP request failed: {}", e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| failure(endpoint, format!("failed to read response: {}", e)))?;
        let rtt = clock.elapsed();

        debug!(%status, rtt_ms = rtt.as_millis() as u64, "Function responded");

        if !status.is_success() {
            let excerpt: String = body.chars().take(ERROR_BODY_CHARS).collect();
            return Err(failure(endpoint, format!("HTTP {}: {}", status, excerpt)));
        }

        let result = if body.trim().is_empty() { None } else { Some(body) };
        Ok(PairResult::new(result, rtt))
    }
}
