// src/certspotter/client.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::types::{GetIssuancesOptions, Issuance};
use crate::metrics::MetricsSink;

/// Base URL of the public certspotter API
pub const DEFAULT_BASE_URL: &str = "https://api.certspotter.com/v1";

/// Path of the issuances endpoint, relative to the base URL
pub const ISSUANCES_ENDPOINT: &str = "/issuances";

/// Errors returned by a single upstream request
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        status: StatusCode,
        retry_after: Option<String>,
    },
    #[error("failed to decode issuances: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Response metadata kept alongside a decoded page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    /// Raw `Retry-After` header value, if any
    pub retry_after: Option<String>,
}

impl ResponseMeta {
    /// Parse `Retry-After` as integer seconds; date forms are ignored
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
            .as_deref()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// One page of issuances
#[derive(Debug, Clone)]
pub struct Page {
    pub issuances: Vec<Issuance>,
    pub response: ResponseMeta,
}

/// Anything that can serve one page of issuances
#[async_trait]
pub trait IssuanceSource: Send + Sync {
    async fn fetch_page(&self, opts: &GetIssuancesOptions) -> Result<Page, ClientError>;
}

/// Configuration for the upstream client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            user_agent: crate::version::user_agent(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the certspotter issuances API
pub struct CertspotterClient {
    config: ClientConfig,
    http_client: reqwest::Client,
    metrics: Arc<dyn MetricsSink>,
}

impl CertspotterClient {
    /// Create a new certspotter client
    pub fn new(config: ClientConfig, metrics: Arc<dyn MetricsSink>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            config,
            http_client,
            metrics,
        })
    }

    /// Build the request URL for the issuances endpoint
    pub fn issuances_url(&self, opts: &GetIssuancesOptions) -> Result<Url, ClientError> {
        let endpoint = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            ISSUANCES_ENDPOINT
        );
        let url = Url::parse_with_params(&endpoint, opts.query_pairs())?;
        Ok(url)
    }

    /// Get one page of issuances.
    /// Endpoint: GET {base_url}/issuances?domain=..&after=..&expand=..
    pub async fn get_issuances(&self, opts: &GetIssuancesOptions) -> Result<Page, ClientError> {
        let url = self.issuances_url(opts)?;

        debug!(
            "Fetching issuances for {} after {:?}",
            opts.domain, opts.after
        );

        let mut request = self
            .http_client
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, self.config.user_agent.as_str());

        if let Some(ref token) = self.config.token {
            if !token.is_empty() {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        let response = request.send().await.map_err(ClientError::Transport)?;

        let status = response.status();
        self.metrics
            .api_request(&format!("/v1{}", ISSUANCES_ENDPOINT), "GET", status.as_u16());

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        check_status(status, retry_after.clone())?;

        let issuances: Vec<Issuance> = response.json().await.map_err(ClientError::Decode)?;

        debug!(
            "Received {} issuances for {}",
            issuances.len(),
            opts.domain
        );

        Ok(Page {
            issuances,
            response: ResponseMeta {
                status: status.as_u16(),
                retry_after,
            },
        })
    }
}

#[async_trait]
impl IssuanceSource for CertspotterClient {
    async fn fetch_page(&self, opts: &GetIssuancesOptions) -> Result<Page, ClientError> {
        self.get_issuances(opts).await
    }
}

/// Statuses 200..=399 are accepted, everything else is an error
pub fn check_status(status: StatusCode, retry_after: Option<String>) -> Result<(), ClientError> {
    if (200..=399).contains(&status.as_u16()) {
        return Ok(());
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Rate limited by certspotter API (retry after {:?})", retry_after);
    }

    Err(ClientError::UnexpectedStatus {
        status,
        retry_after,
    })
}
