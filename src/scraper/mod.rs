//! Scrapers pull one pipeline component's internal telemetry endpoint and
//! normalize it into per-signal received/dropped counter totals.
//!
//! A scrape **never fails as control flow**: connectivity, auth and parse
//! problems are reported inside the returned [`ScrapeResult`] via its
//! `error` field, and the compute engine turns that into the `unknown`
//! health state. The only hard errors are construction-time ones from
//! [`new_scraper`] (bad TLS material, unsupported source type) — those are
//! configuration mistakes surfaced at startup.

pub mod exposition;
mod fluentbit;
mod loki;
mod otelcol;
mod prometheus;

pub use fluentbit::FluentbitScraper;
pub use loki::LokiScraper;
pub use otelcol::OtelcolScraper;
pub use prometheus::PrometheusScraper;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{AuthMode, Source, SourceType};

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// The canonical signal types tracked across all pipeline components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Metrics,
    Logs,
    Traces,
}

/// Evaluation order for per-signal breakdowns; keeps snapshot output stable.
pub const SIGNALS: [Signal; 3] = [Signal::Metrics, Signal::Logs, Signal::Traces];

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
            Signal::Traces => "traces",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized output of one scrape cycle for a single source.
///
/// Counter fields hold raw monotonic totals — not rates. The compute engine
/// keeps the previous result per source and derives per-minute rates from
/// the delta.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub source_id: String,
    pub source_type: SourceType,
    pub scraped_at: DateTime<Utc>,

    /// Total items accepted per signal type.
    pub received: HashMap<Signal, f64>,

    /// Total items dropped per signal type (exporter send failures plus
    /// processor/filter drops).
    pub dropped: HashMap<Signal, f64>,

    /// Component-specific counters and gauges not covered by
    /// received/dropped, e.g. `queue_capacity`, `wal_errors`.
    pub extra: HashMap<String, f64>,

    /// Present when the scrape itself failed (connectivity, auth, parse).
    /// The compute engine maps this to the `unknown` health state.
    pub error: Option<String>,
}

impl ScrapeResult {
    /// An empty result for the given source with all maps allocated.
    pub fn new(source_id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            source_id: source_id.into(),
            source_type,
            scraped_at: Utc::now(),
            received: HashMap::new(),
            dropped: HashMap::new(),
            extra: HashMap::new(),
            error: None,
        }
    }

    /// The same empty shape, carrying a scrape failure.
    pub fn failed(
        source_id: impl Into<String>,
        source_type: SourceType,
        error: impl Into<String>,
    ) -> Self {
        let mut res = Self::new(source_id, source_type);
        res.error = Some(error.into());
        res
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Common contract implemented by every pipeline component scraper.
#[async_trait]
pub trait Scrape: Send + Sync {
    async fn scrape(&self) -> ScrapeResult;
}

/// Builds the scraper for a source configuration. The HTTP client is
/// constructed once here and reused across scrape calls.
pub fn new_scraper(src: &Source) -> anyhow::Result<Box<dyn Scrape>> {
    let client = build_http_client(src)
        .with_context(|| format!("scraper {:?}: build http client", src.id))?;

    match src.kind {
        SourceType::Otelcol => Ok(Box::new(OtelcolScraper::new(src.clone(), client))),
        SourceType::Prometheus => Ok(Box::new(PrometheusScraper::new(src.clone(), client))),
        SourceType::Loki => Ok(Box::new(LokiScraper::new(src.clone(), client))),
        SourceType::Fluentbit => Ok(Box::new(FluentbitScraper::new(src.clone(), client))),
        SourceType::Http => bail!("scraper: unsupported source type \"http\""),
    }
}

/// Constructs a reqwest client honouring the source's auth and TLS settings.
fn build_http_client(src: &Source) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(SCRAPE_TIMEOUT);

    if src.tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if src.auth.mode == AuthMode::Mtls {
        let cert = std::fs::read(&src.auth.cert_file)
            .with_context(|| format!("read cert file {:?}", src.auth.cert_file))?;
        let key = std::fs::read(&src.auth.key_file)
            .with_context(|| format!("read key file {:?}", src.auth.key_file))?;
        let mut pem = cert;
        pem.extend_from_slice(&key);
        let identity = reqwest::Identity::from_pem(&pem).context("load client identity")?;
        builder = builder.identity(identity);

        if !src.auth.ca_file.is_empty() {
            let ca = std::fs::read(&src.auth.ca_file)
                .with_context(|| format!("read ca file {:?}", src.auth.ca_file))?;
            let ca = reqwest::Certificate::from_pem(&ca).context("parse ca certificate")?;
            builder = builder.add_root_certificate(ca);
        }
    }

    builder.build().context("build reqwest client")
}

/// Applies the source's auth mode to one outgoing request.
fn apply_auth(req: reqwest::RequestBuilder, src: &Source) -> reqwest::RequestBuilder {
    match src.auth.mode {
        AuthMode::Apikey => req.header(src.auth.header.as_str(), src.auth.key()),
        AuthMode::Bearer => req.bearer_auth(src.auth.token()),
        AuthMode::Basic => req.basic_auth(&src.auth.username, Some(src.auth.password())),
        // mTLS is configured on the client; nothing per-request.
        AuthMode::Mtls | AuthMode::None => req,
    }
}

/// GETs the source endpoint and parses the Prometheus text exposition.
/// Failures come back as a message for `ScrapeResult::error`.
async fn fetch_families(
    client: &reqwest::Client,
    src: &Source,
) -> Result<exposition::Families, String> {
    let req = apply_auth(client.get(&src.endpoint), src)
        .header("Accept", "text/plain; version=0.0.4");

    let resp = req.send().await.map_err(|e| format!("http get: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(format!("unexpected status {}", status.as_u16()));
    }

    let body = resp.text().await.map_err(|e| format!("read body: {e}"))?;
    Ok(exposition::parse(&body))
}
