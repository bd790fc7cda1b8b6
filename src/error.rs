//! Typed errors for endpoint bootstrap.
//!
//! Most operations return `anyhow::Result`; these variants exist so callers
//! (and tests) can tell a bad descriptor apart from a transport failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint descriptor is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("endpoint descriptor has no token")]
    MissingToken,

    #[error("endpoint issuer failed for search hub '{search_hub}': {message}")]
    Issuer { search_hub: String, message: String },
}
