//! Provider drivers: prompt, image generation, and SQL.
//!
//! Each driver translates one uniform call (`run`, `try_text_to_image`,
//! `execute_query`) into exactly one vendor request shape. HTTP-backed
//! drivers share [`BackoffConfig`] and the helpers below; AWS-backed drivers
//! reach their service through a small client trait so any SDK can be
//! plugged in.

pub mod backoff;
pub mod image_generation;
pub mod prompt;
pub mod sql;

pub use backoff::{BackoffConfig, JitterStrategy};

use crate::error::{Error, Result};

/// Default Azure OpenAI REST API version.
pub const AZURE_API_VERSION: &str = "2024-02-01";

/// Location of an Azure OpenAI deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureDeployment {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// Deployment name chosen when the model was deployed.
    pub deployment: String,
    pub api_version: String,
}

impl AzureDeployment {
    /// Both the endpoint and the deployment are required.
    pub fn new(endpoint: impl Into<String>, deployment: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let deployment = deployment.into();
        if endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "Azure OpenAI drivers require an endpoint".into(),
            ));
        }
        if deployment.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "Azure OpenAI drivers require a deployment".into(),
            ));
        }
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_version: AZURE_API_VERSION.to_string(),
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// URL of an operation under this deployment, e.g. `chat/completions`.
    pub fn url(&self, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint, self.deployment, operation, self.api_version
        )
    }
}

/// Read a required environment variable as a configuration value.
pub(crate) fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::InvalidConfig(format!("environment variable {} is not set", name)))
}

/// Map a non-success HTTP response to [`Error::HttpError`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(backoff::parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    Err(Error::HttpError {
        status,
        body,
        retry_after,
    })
}

/// Show a credential's prefix only.
pub(crate) fn redact(secret: &str) -> String {
    if secret.chars().count() > 6 {
        format!("{}***", secret.chars().take(6).collect::<String>())
    } else {
        "***".to_string()
    }
}
