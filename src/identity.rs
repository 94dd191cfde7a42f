//! Managed identity token acquisition.
//!
//! Acquisition is two-phase: [`IdentityProvider::token_from_msi`] prepares a
//! [`TokenSource`] for one identity, and [`TokenSource::refresh`] performs the
//! exchange with the metadata endpoint.

use std::fmt;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::error::{ProbeError, ProbeResult};
use crate::token::Token;

/// API version understood by the VM instance metadata endpoint.
pub const IMDS_API_VERSION: &str = "2018-02-01";

/// A validated MSI token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsiEndpoint(Url);

impl MsiEndpoint {
    pub fn resolve(raw: &str) -> ProbeResult<Self> {
        let unavailable = |reason: String| ProbeError::EndpointUnavailable {
            endpoint: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| unavailable(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(unavailable(format!("unsupported scheme {}", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(unavailable("missing host".to_string()));
        }
        Ok(MsiEndpoint(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for MsiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Which managed identity a token is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    SystemAssigned,
    UserAssigned { client_id: String },
}

/// A prepared token request that can be (re)executed.
#[async_trait]
pub trait TokenSource: Send {
    async fn refresh(&mut self) -> ProbeResult<()>;

    /// The token from the last successful refresh, or the zero token.
    fn token(&self) -> Token;
}

pub trait IdentityProvider: Send + Sync {
    type Source: TokenSource;

    fn token_from_msi(
        &self,
        endpoint: &MsiEndpoint,
        resource: &str,
        identity: &Identity,
    ) -> ProbeResult<Self::Source>;
}

/// Talks to the instance metadata service over HTTP.
#[derive(Debug, Clone)]
pub struct ImdsIdentityProvider {
    client: Client,
}

impl ImdsIdentityProvider {
    pub fn new(client: Client) -> Self {
        ImdsIdentityProvider { client }
    }
}

impl IdentityProvider for ImdsIdentityProvider {
    type Source = ImdsTokenSource;

    fn token_from_msi(
        &self,
        endpoint: &MsiEndpoint,
        resource: &str,
        identity: &Identity,
    ) -> ProbeResult<ImdsTokenSource> {
        if resource.trim().is_empty() {
            return Err(ProbeError::Acquisition {
                message: "resource must not be empty".to_string(),
            });
        }

        let mut url = endpoint.url().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("api-version", IMDS_API_VERSION)
                .append_pair("resource", resource);
            if let Identity::UserAssigned { client_id } = identity {
                if client_id.trim().is_empty() {
                    return Err(ProbeError::Acquisition {
                        message: "user-assigned identity requires a client ID".to_string(),
                    });
                }
                query.append_pair("client_id", client_id);
            }
        }

        Ok(ImdsTokenSource {
            client: self.client.clone(),
            endpoint: endpoint.clone(),
            url,
            token: Token::default(),
        })
    }
}

#[derive(Debug)]
pub struct ImdsTokenSource {
    client: Client,
    endpoint: MsiEndpoint,
    url: Url,
    token: Token,
}

impl ImdsTokenSource {
    #[cfg(test)]
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    fn refresh_error(&self, message: impl Into<String>) -> ProbeError {
        ProbeError::Refresh {
            endpoint: self.endpoint.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ImdsErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[async_trait]
impl TokenSource for ImdsTokenSource {
    async fn refresh(&mut self) -> ProbeResult<()> {
        debug!("Requesting token from {}", self.endpoint);
        let response = self
            .client
            .get(self.url.clone())
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| self.refresh_error(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.refresh_error(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ImdsErrorBody>(&body).unwrap_or_default();
            return Err(self.refresh_error(format!(
                "HTTP {}: {} {}",
                status, detail.error, detail.error_description
            )
            .trim_end()
            .to_string()));
        }

        self.token = serde_json::from_str(&body)
            .map_err(|e| self.refresh_error(format!("invalid token response: {e}")))?;
        Ok(())
    }

    fn token(&self) -> Token {
        self.token.clone()
    }
}
