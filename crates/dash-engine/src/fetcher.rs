//! Segment fetcher: downloads one remote resource with a bounded retry loop.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, redirect::Policy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{HttpConfig, RetryPolicy};
use crate::error::{DashError, Result};

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Source of remote bytes. Implemented for `reqwest::Client`.
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse>;
}

#[async_trait]
impl HttpSource for Client {
    async fn get(&self, url: &Url) -> Result<HttpResponse> {
        let response = Client::get(self, url.clone()).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<Client> {
    install_rustls_provider();
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.as_str())
        .default_headers(config.headers.clone())
        .redirect(Policy::limited(config.max_redirects));

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    builder
        .build()
        .map_err(|e| DashError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Why a fetch produced no bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },
}

impl From<FetchError> for DashError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Exhausted {
                url,
                attempts,
                last_error,
            } => DashError::FetchFailed {
                url,
                attempts,
                reason: last_error,
            },
            FetchError::Cancelled { .. } => DashError::Cancelled,
        }
    }
}

pub struct SegmentFetcher {
    source: Arc<dyn HttpSource>,
    policy: RetryPolicy,
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn HttpSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetch `url`, retrying every failure up to `max_attempts` times.
    ///
    /// A non-success status and a transport error are treated alike. The
    /// outcome is always a value: the bytes, or a definitive [`FetchError`].
    #[instrument(skip(self, url, token), fields(url = %url))]
    pub async fn fetch(&self, url: &Url, token: &CancellationToken) -> Result<Bytes, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled {
                    url: url.to_string(),
                });
            }

            let result = tokio::select! {
                _ = token.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
                result = self.source.get(url) => result,
            };

            match result {
                Ok(response) if response.status.is_success() => {
                    debug!(
                        attempt = attempt + 1,
                        bytes = response.body.len(),
                        "Fetched resource"
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    last_error = DashError::http_status(response.status, url.as_str()).to_string();
                    warn!(
                        attempt = attempt + 1,
                        max = max_attempts,
                        status = %response.status,
                        "Fetch attempt failed"
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt = attempt + 1,
                        max = max_attempts,
                        error = %e,
                        "Fetch attempt raised an error"
                    );
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.policy.delay_for_attempt(attempt);
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(FetchError::Cancelled { url: url.to_string() });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        warn!(attempts = max_attempts, "Giving up on resource");
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}
