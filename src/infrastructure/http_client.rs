//! HTTP client for the price endpoints
//!
//! Workers depend on the [`PageFetcher`] trait; [`HttpClient`] is the reqwest
//! implementation carrying the configured header set, proxy and timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;

use crate::infrastructure::config::FetchConfig;

/// Status and raw body of a completed request. Any status is a valid response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// The status line arrived but the body could not be read.
    #[error("failed to read response body (status {status}): {message}")]
    Body { status: u16, message: String },
}

impl FetchError {
    /// Status observed before the failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Body { status, .. } => Some(*status),
            Self::Timeout(_) | Self::Transport(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("Invalid header name: {name}"))?;
            let value = HeaderValue::from_str(value).with_context(|| format!("Invalid value for header {name}"))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10));

        if config.proxy.enabled {
            if let Some(url) = &config.proxy.url {
                let mut proxy = Proxy::all(url).with_context(|| format!("Invalid proxy url: {url}"))?;
                if let Some(username) = &config.proxy.username {
                    proxy = proxy.basic_auth(username, config.proxy.password.as_deref().unwrap_or_default());
                }
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        tracing::debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body { status, message: e.to_string() })?;

        tracing::debug!("Fetched {} ({}, {} bytes)", url, status, body.len());
        Ok(FetchResponse { status, body })
    }
}
