//! HTTP retrieval of remote configuration documents

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;

/// Fetches the raw document behind a URL
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Perform one GET; retries are the caller's business
    ///
    /// # Errors
    /// Returns `Fetch` on transport failure or a non-success status
    async fn fetch(&self, url: &str) -> Result<String, RemoteError>;
}

/// Identifying user agent sent with every request
#[must_use]
pub fn user_agent() -> String {
    format!(
        "tunnelkit/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// `reqwest`-backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Fetcher with the default user agent
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_user_agent(&user_agent())
    }

    /// Fetcher with an explicit user agent
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised
    pub fn with_user_agent(agent: &str) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(agent)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RemoteError::Fetch {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, RemoteError> {
        let fetch_err = |e: reqwest::Error| RemoteError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;

        response.text().await.map_err(fetch_err)
    }
}
