//! Fluent Bit scraper — reads the /api/v1/metrics JSON endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::Source;
use crate::scraper::{apply_auth, Scrape, ScrapeResult, Signal};

/// The JSON shape returned by Fluent Bit's /api/v1/metrics.
#[derive(Debug, Default, Deserialize)]
struct FbMetrics {
    #[serde(default)]
    input: HashMap<String, FbInput>,
    #[serde(default)]
    filter: HashMap<String, FbFilter>,
    #[serde(default)]
    output: HashMap<String, FbOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct FbInput {
    #[serde(default)]
    records: u64,
    #[serde(default)]
    bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FbFilter {
    #[serde(default)]
    add_records: u64,
    #[serde(default)]
    drop_records: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FbOutput {
    #[serde(default)]
    proc_records: u64,
    #[serde(default)]
    proc_bytes: u64,
    #[serde(default)]
    errors: u64,
    #[serde(default)]
    retries: u64,
    #[serde(default)]
    retried_failed: u64,
}

pub struct FluentbitScraper {
    src: Source,
    client: reqwest::Client,
}

impl FluentbitScraper {
    pub fn new(src: Source, client: reqwest::Client) -> Self {
        Self { src, client }
    }

    fn metrics_url(&self) -> String {
        format!(
            "{}/api/v1/metrics",
            self.src.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Scrape for FluentbitScraper {
    /// Received = records that successfully exited through output plugins
    /// (`proc_records`), **not** input records — so that
    /// `drop_pct = dropped / (received + dropped)` reads 100% when
    /// everything is lost. Dropped = permanently lost records: outputs that
    /// exhausted their retries plus records dropped by filter plugins.
    async fn scrape(&self) -> ScrapeResult {
        let mut res = ScrapeResult::new(&self.src.id, self.src.kind);
        let url = self.metrics_url();

        let req = apply_auth(self.client.get(&url), &self.src)
            .header("Accept", "application/json");

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!("scraper: fluentbit fetch failed: source={} err={err}", self.src.id);
                res.error = Some(format!("fluentbit scrape {:?}: {err}", self.src.id));
                return res;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            res.error = Some(format!(
                "fluentbit scrape {:?}: unexpected status {}",
                self.src.id,
                status.as_u16()
            ));
            return res;
        }

        let metrics: FbMetrics = match resp.json().await {
            Ok(m) => m,
            Err(err) => {
                res.error = Some(format!("fluentbit scrape {:?}: decode json: {err}", self.src.id));
                return res;
            }
        };

        let input_records: f64 = metrics.input.values().map(|p| p.records as f64).sum();
        let input_bytes: f64 = metrics.input.values().map(|p| p.bytes as f64).sum();

        let filter_dropped: f64 = metrics.filter.values().map(|p| p.drop_records as f64).sum();
        let filter_added: f64 = metrics.filter.values().map(|p| p.add_records as f64).sum();

        let out_proc: f64 = metrics.output.values().map(|p| p.proc_records as f64).sum();
        let out_bytes: f64 = metrics.output.values().map(|p| p.proc_bytes as f64).sum();
        let out_errors: f64 = metrics.output.values().map(|p| p.errors as f64).sum();
        let out_retries: f64 = metrics.output.values().map(|p| p.retries as f64).sum();
        let out_retried_failed: f64 =
            metrics.output.values().map(|p| p.retried_failed as f64).sum();

        res.received.insert(Signal::Logs, out_proc);
        res.dropped.insert(Signal::Logs, out_retried_failed + filter_dropped);

        res.extra.insert("input_records".into(), input_records);
        res.extra.insert("input_bytes".into(), input_bytes);
        res.extra.insert("output_proc_records".into(), out_proc);
        res.extra.insert("output_proc_bytes".into(), out_bytes);
        res.extra.insert("output_errors".into(), out_errors);
        res.extra.insert("output_retries".into(), out_retries);
        res.extra.insert("output_retried_failed".into(), out_retried_failed);
        res.extra.insert("filter_add_records".into(), filter_added);
        res.extra.insert("filter_drop_records".into(), filter_dropped);

        res
    }
}
