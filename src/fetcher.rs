//! Content retrieval.
//!
//! [`ContentFetcher`] is the only way the processing core reads a target.
//! A fetch always yields a [`FetchOutcome`]: either a response with its status
//! and body, or a failure message, both carrying the elapsed time.
//! [`HttpFetcher`] does a plain GET with the configured timeout, user agent and
//! redirect policy; [`StaticContentFetcher`] serves fixed content for offline
//! runs and benchmarks.

use crate::config::FetchSettings;
use crate::error::HarvestError;
use crate::model::FetchOutcome;
use crate::utils::validate_url;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// Retrieves the raw content behind an address.
///
/// Implementations never fail: transport problems are reported through
/// [`FetchOutcome::failure`] together with the elapsed time.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, address: &str) -> FetchOutcome;
}

/// HTTP GET retrieval backed by a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, HarvestError> {
        let redirect = if settings.follow_redirects {
            Policy::limited(10)
        } else {
            Policy::none()
        };

        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .redirect(redirect)
            .build()
            .map_err(|e| HarvestError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }

    async fn get_text(&self, address: &str) -> Result<(u16, String), HarvestError> {
        let url = validate_url(address)?;
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, address: &str) -> FetchOutcome {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.get_text(address)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(self.timeout)),
        };

        let elapsed = start.elapsed();
        match result {
            Ok((status, body)) => {
                debug!("GET {} -> {} in {:?}", address, status, elapsed);
                FetchOutcome::response(status, elapsed, body)
            }
            Err(e) => {
                e.log(format_args!("GET {} failed after {:?}", address, elapsed));
                FetchOutcome::failure(elapsed, e.to_string())
            }
        }
    }
}

/// Serves a fixed document for every address.
///
/// Used for offline runs, tests and benchmarks.
#[derive(Debug, Clone)]
pub struct StaticContentFetcher {
    status: u16,
    body: String,
    latency: Duration,
}

impl StaticContentFetcher {
    pub const SAMPLE_PAGE: &'static str = "<html><body>\
        <h1>Test Company</h1>\
        <p>Email: test@example.com</p>\
        <p>Phone: +7 (999) 123-45-67</p>\
        <p>Address: ул. Тестовая, 123</p>\
        </body></html>";

    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            latency: Duration::ZERO,
        }
    }

    /// A 200 response carrying one email, one phone and one address.
    pub fn sample() -> Self {
        Self::new(200, Self::SAMPLE_PAGE)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ContentFetcher for StaticContentFetcher {
    async fn fetch(&self, _address: &str) -> FetchOutcome {
        let start = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        FetchOutcome::response(self.status, start.elapsed(), self.body.clone())
    }
}
