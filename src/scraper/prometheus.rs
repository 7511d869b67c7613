//! Prometheus scraper — reads Prometheus's own /metrics endpoint for
//! ingestion and remote-write health.

use async_trait::async_trait;
use tracing::warn;

use crate::config::Source;
use crate::scraper::{fetch_families, Scrape, ScrapeResult, Signal};

// TSDB ingestion counter — total samples written to the local head.
const SAMPLES_APPENDED: &str = "prometheus_tsdb_head_samples_appended_total";

// Remote write drop counter — samples that could not be sent and were lost.
const SAMPLES_DROPPED: &str = "prometheus_remote_storage_samples_dropped_total";

// Remote write success counter.
const SAMPLES_SENT: &str = "prometheus_remote_storage_succeeded_samples_total";

// Remote write queue depth and capacity.
const QUEUE_PENDING: &str = "prometheus_remote_storage_samples_pending";
const QUEUE_CAPACITY: &str = "prometheus_remote_storage_queue_capacity";

// Shards currently active for remote write.
const SHARDS_ACTIVE: &str = "prometheus_remote_storage_shards";

// Unrecoverable write errors to the local WAL.
const WAL_ERRORS: &str = "prometheus_tsdb_wal_storage_errors_total";

pub struct PrometheusScraper {
    src: Source,
    client: reqwest::Client,
}

impl PrometheusScraper {
    pub fn new(src: Source, client: reqwest::Client) -> Self {
        Self { src, client }
    }
}

#[async_trait]
impl Scrape for PrometheusScraper {
    /// All signal data is reported under `metrics` — Prometheus only
    /// handles metric samples. Drops are summed across all remote-write
    /// destinations.
    async fn scrape(&self) -> ScrapeResult {
        let mut res = ScrapeResult::new(&self.src.id, self.src.kind);

        let fams = match fetch_families(&self.client, &self.src).await {
            Ok(fams) => fams,
            Err(err) => {
                warn!(
                    "scraper: prometheus fetch failed: source={} err={err}",
                    self.src.id
                );
                res.error = Some(format!("prometheus scrape {:?}: {err}", self.src.id));
                return res;
            }
        };

        let appended = fams.get(SAMPLES_APPENDED);
        let dropped = fams.get(SAMPLES_DROPPED);

        res.received.insert(Signal::Metrics, appended);
        res.dropped.insert(Signal::Metrics, dropped);

        res.extra.insert("samples_appended".into(), appended);
        res.extra.insert("samples_dropped".into(), dropped);
        res.extra.insert("samples_sent".into(), fams.get(SAMPLES_SENT));
        res.extra.insert("queue_pending".into(), fams.get(QUEUE_PENDING));
        res.extra.insert("queue_capacity".into(), fams.get(QUEUE_CAPACITY));
        res.extra.insert("shards_active".into(), fams.get(SHARDS_ACTIVE));
        res.extra.insert("wal_errors".into(), fams.get(WAL_ERRORS));

        res
    }
}
