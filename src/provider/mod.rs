//! # FaaS Providers
//!
//! The four cloud providers functions can be hosted on, and how to tell
//! them apart from a resource link.
//!
//! - [`Provider`] - Google, Azure, AWS or IBM
//! - [`ProviderAccounts`] - whichever credential bundles were loaded
//! - [`detect_provider`] / [`detect_region`] - inspect a resource link
//!
//! ```rust
//! use enactor::provider::{detect_provider, detect_region, Provider};
//!
//! let link = "https://europe-west1-demo.cloudfunctions.net/hello";
//! assert_eq!(detect_provider(link), Some(Provider::Google));
//! assert_eq!(detect_region(link).as_deref(), Some("europe-west1"));
//! ```

mod account;

pub use account::{AwsAccount, AzureAccount, GoogleAccount, IbmAccount, ProviderAccounts};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// LAZY REGEX PATTERNS (compiled once)
// ============================================================================

/// `https://<id>.execute-api.<region>.amazonaws.com/...` and `lambda-url.<region>.on.aws`
static AWS_REGION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:execute-api|lambda-url|lambda)[.:]([a-z]{2}(?:-gov)?-[a-z]+-\d)").unwrap()
});

/// `https://<region>-<project>.cloudfunctions.net/...`
static GOOGLE_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://([a-z]+-[a-z]+\d)-[^.]+\.cloudfunctions\.net").unwrap());

/// `https://<region>.functions.appdomain.cloud/...`
static IBM_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://([a-z]+-[a-z]+)\.functions\.(?:appdomain\.cloud|cloud\.ibm\.com)").unwrap());

/// Cloud providers a function can be deployed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Azure,
    Aws,
    Ibm,
}

impl Provider {
    /// All providers in failover preference order
    pub const ALL: [Provider; 4] = [
        Provider::Google,
        Provider::Azure,
        Provider::Aws,
        Provider::Ibm,
    ];

    /// Parse the provider prefix of a deployment descriptor (`AWS_us-east-1_512`)
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "google" | "gcp" | "gcf" => Some(Provider::Google),
            "azure" => Some(Provider::Azure),
            "aws" | "lambda" => Some(Provider::Aws),
            "ibm" => Some(Provider::Ibm),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Google => "Google",
            Provider::Azure => "Azure",
            Provider::Aws => "AWS",
            Provider::Ibm => "IBM",
        };
        f.write_str(name)
    }
}

/// Detect the provider hosting a resource link
pub fn detect_provider(resource_link: &str) -> Option<Provider> {
    let link = resource_link.to_ascii_lowercase();
    if link.contains("amazonaws.com") || link.contains(".on.aws") || link.starts_with("arn:aws:lambda") {
        Some(Provider::Aws)
    } else if link.contains("cloudfunctions.net") || link.contains(".run.app") {
        Some(Provider::Google)
    } else if link.contains("azurewebsites.net") {
        Some(Provider::Azure)
    } else if link.contains("appdomain.cloud") || link.contains("cloud.ibm.com") {
        Some(Provider::Ibm)
    } else {
        None
    }
}

/// Detect the region encoded in a resource link (Azure links carry none)
pub fn detect_region(resource_link: &str) -> Option<String> {
    let link = resource_link.to_ascii_lowercase();
    let pattern: &Regex = match detect_provider(&link)? {
        Provider::Aws => &AWS_REGION,
        Provider::Google => &GOOGLE_REGION,
        Provider::Ibm => &IBM_REGION,
        Provider::Azure => return None,
    };
    pattern
        .captures(&link)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// A parsed `<PROVIDER>_<region>_<memory>` deployment descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub provider: Option<Provider>,
    pub region: String,
    pub memory_mb: Option<u32>,
}

impl Deployment {
    /// Parse a deployment string; returns None when no region part is present
    pub fn parse(deployment: &str) -> Option<Self> {
        let mut parts = deployment.splitn(3, '_');
        let provider = Provider::from_label(parts.next()?);
        let region = parts.next().filter(|r| !r.is_empty())?.to_string();
        let memory_mb = parts.next().and_then(|m| m.trim_end_matches("MB").parse().ok());
        Some(Self {
            provider,
            region,
            memory_mb,
        })
    }
}
