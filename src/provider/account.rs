//! Provider credential bundles
//!
//! Accounts are read-only once loaded. A provider is either fully
//! configured or absent; partial key sets are dropped at load time.

use reqwest::RequestBuilder;

use super::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsAccount {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleAccount {
    pub service_account_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureAccount {
    pub function_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IbmAccount {
    pub api_key: String,
}

/// The subset of provider accounts available to this process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAccounts {
    pub google: Option<GoogleAccount>,
    pub azure: Option<AzureAccount>,
    pub aws: Option<AwsAccount>,
    pub ibm: Option<IbmAccount>,
}

impl ProviderAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_google(mut self, key: impl Into<String>) -> Self {
        self.google = Some(GoogleAccount {
            service_account_key: key.into(),
        });
        self
    }

    pub fn with_azure(mut self, key: impl Into<String>) -> Self {
        self.azure = Some(AzureAccount {
            function_key: key.into(),
        });
        self
    }

    pub fn with_aws(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.aws = Some(AwsAccount {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        });
        self
    }

    pub fn with_ibm(mut self, key: impl Into<String>) -> Self {
        self.ibm = Some(IbmAccount {
            api_key: key.into(),
        });
        self
    }

    /// Check whether credentials for a provider are loaded
    pub fn has(&self, provider: Provider) -> bool {
        match provider {
            Provider::Google => self.google.is_some(),
            Provider::Azure => self.azure.is_some(),
            Provider::Aws => self.aws.is_some(),
            Provider::Ibm => self.ibm.is_some(),
        }
    }

    /// Configured providers, in failover preference order
    pub fn configured(&self) -> Vec<Provider> {
        Provider::ALL.into_iter().filter(|p| self.has(*p)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.configured().is_empty()
    }

    /// All secret strings, for redacting them out of logged results
    pub fn secrets(&self) -> Vec<&str> {
        let mut secrets = Vec::new();
        if let Some(g) = &self.google {
            secrets.push(g.service_account_key.as_str());
        }
        if let Some(a) = &self.azure {
            secrets.push(a.function_key.as_str());
        }
        if let Some(a) = &self.aws {
            secrets.push(a.access_key.as_str());
            secrets.push(a.secret_key.as_str());
            if let Some(token) = &a.session_token {
                secrets.push(token.as_str());
            }
        }
        if let Some(i) = &self.ibm {
            secrets.push(i.api_key.as_str());
        }
        secrets.retain(|s| !s.is_empty());
        secrets
    }

    /// Attach the provider's credentials to an outgoing invocation request
    pub fn authorize(&self, provider: Option<Provider>, request: RequestBuilder) -> RequestBuilder {
        match provider {
            Some(Provider::Google) => match &self.google {
                Some(g) => request.bearer_auth(&g.service_account_key),
                None => request,
            },
            Some(Provider::Azure) => match &self.azure {
                Some(a) => request.header("x-functions-key", &a.function_key),
                None => request,
            },
            Some(Provider::Ibm) => match &self.ibm {
                Some(i) => request.header("X-Require-Whisk-Auth", &i.api_key),
                None => request,
            },
            Some(Provider::Aws) => match self.aws.as_ref().and_then(|a| a.session_token.as_ref()) {
                Some(token) => request.header("X-Amz-Security-Token", token),
                None => request,
            },
            None => request,
        }
    }
}
