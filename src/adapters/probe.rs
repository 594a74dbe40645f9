//! HTTP prober for the metadata API.
//!
//! One GET per probe. The response body is read to completion so the CDN
//! sees a finished transfer; its content is discarded.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::domain::{ProbeFailure, ProbeResponse, ProbeTarget};

use super::Prober;

/// Header naming the backend that served the response
pub const CANARY_HEADER: &str = "x-canary-response-target";

/// CDN cache header
pub const CF_CACHE_HEADER: &str = "cf-cache-status";

const USER_AGENT: &str = concat!("lidarr-cache-warmer/", env!("CARGO_PKG_VERSION"));

/// Probes the metadata API over HTTP
pub struct HttpProber {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build probe HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, target: &ProbeTarget) -> reqwest::RequestBuilder {
        match target {
            ProbeTarget::Artist { mbid } => self.client.get(format!("{}/artist/{}", self.base_url, mbid)),
            ProbeTarget::ReleaseGroup { rg_mbid } => {
                self.client.get(format!("{}/album/{}", self.base_url, rg_mbid))
            }
            ProbeTarget::TextSearch { query, .. } => self
                .client
                .get(format!("{}/search", self.base_url))
                .query(&[("type", "all"), ("query", query.as_str())]),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Map a reqwest error onto a probe failure
fn classify_error(err: &reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        return ProbeFailure::Timeout;
    }
    let reason = if err.is_connect() {
        "connect"
    } else if err.is_redirect() {
        "redirect"
    } else if err.is_body() {
        "body"
    } else if err.is_decode() {
        "decode"
    } else if err.is_request() {
        "request"
    } else {
        "other"
    };
    ProbeFailure::Transport(reason.to_string())
}

#[async_trait]
impl Prober for HttpProber {
    fn name(&self) -> &str {
        "http"
    }

    async fn probe(&self, target: &ProbeTarget) -> ProbeResponse {
        let response = match self.request(target).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(entity = target.entity_id(), "Probe failed: {}", e);
                return ProbeResponse::failure(classify_error(&e));
            }
        };

        let status = response.status().as_u16();
        let canary = header_value(response.headers(), CANARY_HEADER);
        let cf_cache = header_value(response.headers(), CF_CACHE_HEADER);

        // A timeout while draining the body still counts as a timeout
        if let Err(e) = response.bytes().await {
            debug!(entity = target.entity_id(), status, "Probe body failed: {}", e);
            return ProbeResponse::failure(classify_error(&e)).with_headers(canary, cf_cache);
        }

        ProbeResponse::from_status(status).with_headers(canary, cf_cache)
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .with_context(|| format!("Metadata API unreachable at {}", self.base_url))?;

        if response.status().is_server_error() {
            anyhow::bail!("Metadata API at {} returned {}", self.base_url, response.status());
        }
        Ok(())
    }
}
