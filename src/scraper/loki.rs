//! Loki scraper — log ingestion and storage-flush health.

use async_trait::async_trait;
use tracing::warn;

use crate::config::Source;
use crate::scraper::{fetch_families, Scrape, ScrapeResult, Signal};

// Lines received by the distributor from push requests.
const LINES_RECEIVED: &str = "loki_distributor_lines_received_total";

// Bytes received by the distributor.
const BYTES_RECEIVED: &str = "loki_distributor_bytes_received_total";

// Chunks successfully flushed to storage by ingesters.
const LINES_FLUSHED: &str = "loki_ingester_chunks_flushed_total";

// Flush failures — chunks that could not be written to the store.
const FLUSH_ERRORS: &str = "loki_ingester_flush_failures_total";

// Ring health — only present in microservice mode; absent in monolithic
// single-binary mode. Zero means the metric is unavailable, not that the
// ring is unhealthy.
const RING_TOKENS: &str = "cortex_ring_tokens_owned";
const RING_REPLICATION: &str = "cortex_ring_replication_factor";

// Ingester ingestion rate in bytes/sec.
const INGESTION_RATE: &str = "loki_ingester_ingestion_rate_bytes";

pub struct LokiScraper {
    src: Source,
    client: reqwest::Client,
}

impl LokiScraper {
    pub fn new(src: Source, client: reqwest::Client) -> Self {
        Self { src, client }
    }
}

#[async_trait]
impl Scrape for LokiScraper {
    /// All signal data is reported under `logs`. Received = lines that
    /// entered the distributor; dropped = flush failures at the ingester
    /// layer.
    async fn scrape(&self) -> ScrapeResult {
        let mut res = ScrapeResult::new(&self.src.id, self.src.kind);

        let fams = match fetch_families(&self.client, &self.src).await {
            Ok(fams) => fams,
            Err(err) => {
                warn!("scraper: loki fetch failed: source={} err={err}", self.src.id);
                res.error = Some(format!("loki scrape {:?}: {err}", self.src.id));
                return res;
            }
        };

        let lines_received = fams.get(LINES_RECEIVED);
        let flush_errors = fams.get(FLUSH_ERRORS);

        res.received.insert(Signal::Logs, lines_received);
        res.dropped.insert(Signal::Logs, flush_errors);

        res.extra.insert("lines_received".into(), lines_received);
        res.extra.insert("bytes_received".into(), fams.get(BYTES_RECEIVED));
        res.extra.insert("lines_flushed".into(), fams.get(LINES_FLUSHED));
        res.extra.insert("flush_errors".into(), flush_errors);
        res.extra.insert("ring_tokens".into(), fams.get(RING_TOKENS));
        res.extra.insert("ring_replication".into(), fams.get(RING_REPLICATION));
        res.extra.insert("ingestion_rate_bytes".into(), fams.get(INGESTION_RATE));

        res
    }
}
