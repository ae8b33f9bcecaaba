//! OAuth access tokens for the Compute Engine API.

use std::sync::Arc;

use gcp_auth::TokenProvider;
use tracing::debug;

use crate::error::ProviderError;

/// Read/write access to Compute Engine.
pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

enum Source {
    Fixed(String),
    Provider(Arc<dyn TokenProvider>),
}

/// Where bearer tokens come from.
pub struct TokenSource {
    source: Source,
}

impl TokenSource {
    /// Token supplied by the operator (e.g. `gcloud auth print-access-token`).
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Fixed(token.into()),
        }
    }

    pub fn from_provider(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            source: Source::Provider(provider),
        }
    }

    /// Application Default Credentials: `GOOGLE_APPLICATION_CREDENTIALS`,
    /// gcloud user credentials, or the metadata server.
    pub async fn application_default() -> Result<Self, ProviderError> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            ProviderError::Auth(format!("failed to initialize GCP authentication: {}", e))
        })?;
        Ok(Self::from_provider(provider))
    }

    /// An explicit token wins; otherwise fall back to default credentials.
    pub async fn resolve(access_token: Option<String>) -> Result<Self, ProviderError> {
        match access_token.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                debug!("Using explicit access token");
                Ok(Self::fixed(token))
            }
            None => Self::application_default().await,
        }
    }

    /// A valid bearer token. Providers cache and refresh their own tokens.
    pub async fn token(&self) -> Result<String, ProviderError> {
        match &self.source {
            Source::Fixed(token) => Ok(token.clone()),
            Source::Provider(provider) => {
                let token = provider.token(&[COMPUTE_SCOPE]).await.map_err(|e| {
                    ProviderError::Auth(format!("failed to get access token: {}", e))
                })?;
                Ok(token.as_str().to_string())
            }
        }
    }
}
