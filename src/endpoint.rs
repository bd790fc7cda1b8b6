//! Session endpoint: bearer token plus the search and analytics base URIs.
//!
//! A [`SessionEndpoint`] is built once per session from an endpoint
//! descriptor, a small JSON document issued by a trusted server-side
//! component ([`EndpointIssuer`]). The normalised descriptor is cached in
//! the session store under [`SESSION_ENDPOINT_KEY`] so later queries skip
//! the issuer round-trip until the token expires.
//!
//! # Descriptor shape
//!
//! ```json
//! { "token": "xx-...", "clientUri": "https://org.org.coveo.com", "analyticsUri": "https://..." }
//! ```
//!
//! `platformUri` is accepted as an alias for `clientUri`. Missing URIs fall
//! back to the platform default.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EndpointError;
use crate::store::KeyValueStore;

/// Session-store key for the cached descriptor.
pub const SESSION_ENDPOINT_KEY: &str = "coveo_endpoint";

/// Platform URI used when a descriptor names none.
pub const DEFAULT_PLATFORM_URI: &str = "https://platform.cloud.coveo.com";

/// Path appended to the analytics base URI.
pub const ANALYTICS_PATH: &str = "/rest/ua/v15/analytics";

/// Credentials and base URIs for one session. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    token: String,
    client_uri: String,
    analytics_uri: String,
}

impl SessionEndpoint {
    /// `analytics_base` is the bare host; [`ANALYTICS_PATH`] is appended.
    pub fn new(
        token: impl Into<String>,
        client_uri: impl Into<String>,
        analytics_base: impl AsRef<str>,
    ) -> Self {
        Self {
            token: token.into(),
            client_uri: trim_slash(&client_uri.into()).to_string(),
            analytics_uri: format!("{}{}", trim_slash(analytics_base.as_ref()), ANALYTICS_PATH),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn client_uri(&self) -> &str {
        &self.client_uri
    }

    /// Full analytics base, including [`ANALYTICS_PATH`].
    pub fn analytics_uri(&self) -> &str {
        &self.analytics_uri
    }
}

// The token is a bearer secret; keep it out of logs.
impl std::fmt::Debug for SessionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEndpoint")
            .field("token", &"<redacted>")
            .field("client_uri", &self.client_uri)
            .field("analytics_uri", &self.analytics_uri)
            .finish()
    }
}

fn trim_slash(uri: &str) -> &str {
    uri.trim_end_matches('/')
}

/// Endpoint descriptor as issued (or cached).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_uri: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_guest_user: bool,
}

impl EndpointDescriptor {
    pub fn parse(data: &str) -> Result<Self, EndpointError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Fill URI defaults: client falls back to `clientUri`, `platformUri`,
    /// then `default_uri`; analytics falls back to `analyticsUri`, then the
    /// resolved client URI.
    pub fn normalize(self, default_uri: &str) -> Result<Self, EndpointError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(EndpointError::MissingToken)?;
        let client_uri = non_empty(self.client_uri)
            .or_else(|| non_empty(self.platform_uri))
            .unwrap_or_else(|| default_uri.to_string());
        let analytics_uri = non_empty(self.analytics_uri)
            .map(|uri| trim_slash(&uri).trim_end_matches(ANALYTICS_PATH).to_string())
            .unwrap_or_else(|| client_uri.clone());

        Ok(Self {
            token: Some(token),
            client_uri: Some(client_uri),
            platform_uri: None,
            analytics_uri: Some(analytics_uri),
            is_guest_user: self.is_guest_user,
        })
    }

    /// Build the session. Call on a normalised descriptor.
    pub fn to_endpoint(&self) -> Result<SessionEndpoint, EndpointError> {
        let token = self.token.clone().ok_or(EndpointError::MissingToken)?;
        let client_uri = self.client_uri.clone().unwrap_or_default();
        let analytics_base = self
            .analytics_uri
            .clone()
            .unwrap_or_else(|| client_uri.clone());
        Ok(SessionEndpoint::new(token, client_uri, analytics_base))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============ Issuers ============

/// Source of fresh endpoint descriptors.
///
/// Returns the descriptor as a raw JSON string; parsing and defaulting
/// happen in [`bootstrap`].
#[async_trait]
pub trait EndpointIssuer: Send + Sync {
    async fn issue(&self, search_hub: &str) -> Result<String>;
}

/// Issuer returning a fixed descriptor, e.g. built from a configured API token.
pub struct StaticIssuer {
    descriptor: String,
}

impl StaticIssuer {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }

    /// Descriptor carrying only `token` and `clientUri`.
    pub fn from_token(token: &str, client_uri: &str) -> Self {
        let descriptor = serde_json::json!({ "token": token, "clientUri": client_uri });
        Self::new(descriptor.to_string())
    }
}

#[async_trait]
impl EndpointIssuer for StaticIssuer {
    async fn issue(&self, _search_hub: &str) -> Result<String> {
        Ok(self.descriptor.clone())
    }
}

/// Issuer that asks an HTTP service for a descriptor.
///
/// Sends `POST <url>` with `{"searchHub": "<hub>"}` and returns the response
/// body verbatim.
pub struct HttpIssuer {
    client: reqwest::Client,
    url: String,
}

impl HttpIssuer {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EndpointIssuer for HttpIssuer {
    async fn issue(&self, search_hub: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "searchHub": search_hub }))
            .send()
            .await
            .with_context(|| format!("Endpoint issuer unreachable at {}", self.url))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EndpointError::Issuer {
                search_hub: search_hub.to_string(),
                message: format!("HTTP {}: {}", status, body),
            }
            .into());
        }
        Ok(body)
    }
}

// ============ Bootstrap ============

/// Load the cached descriptor or request a new one, normalise and cache it,
/// and build the [`SessionEndpoint`].
///
/// Returns the descriptor alongside the endpoint so callers can read
/// `isGuestUser`.
pub async fn bootstrap(
    store: &dyn KeyValueStore,
    issuer: &dyn EndpointIssuer,
    search_hub: &str,
    default_uri: &str,
) -> Result<(SessionEndpoint, EndpointDescriptor)> {
    let cached = match store.get(SESSION_ENDPOINT_KEY)? {
        Some(data) => match EndpointDescriptor::parse(&data).and_then(|d| d.normalize(default_uri)) {
            Ok(descriptor) => {
                debug!("using cached endpoint descriptor");
                Some(descriptor)
            }
            Err(e) => {
                warn!(error = %e, "discarding unusable cached endpoint descriptor");
                store.remove(SESSION_ENDPOINT_KEY)?;
                None
            }
        },
        None => None,
    };

    let descriptor = match cached {
        Some(descriptor) => descriptor,
        None => {
            info!(search_hub, "requesting endpoint descriptor");
            let data = issuer.issue(search_hub).await?;
            EndpointDescriptor::parse(&data)?.normalize(default_uri)?
        }
    };
    store.set(SESSION_ENDPOINT_KEY, &serde_json::to_string(&descriptor)?)?;
    let endpoint = descriptor.to_endpoint()?;
    Ok((endpoint, descriptor))
}

/// Drop the cached descriptor so the next [`bootstrap`] goes to the issuer.
pub fn clear_cached(store: &dyn KeyValueStore) -> Result<()> {
    store.remove(SESSION_ENDPOINT_KEY)
}
