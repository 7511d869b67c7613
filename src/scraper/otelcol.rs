//! OpenTelemetry Collector scraper.

use async_trait::async_trait;
use tracing::warn;

use crate::config::Source;
use crate::scraper::{fetch_families, Scrape, ScrapeResult, Signal};

// OTel Collector base metric names. Each comes in three signal-type
// suffixes: _spans (traces), _metric_points (metrics), _log_records (logs).
const RECEIVER_ACCEPTED: &str = "otelcol_receiver_accepted";
const RECEIVER_REFUSED: &str = "otelcol_receiver_refused";
const EXPORTER_SENT: &str = "otelcol_exporter_sent";
const EXPORTER_FAILED: &str = "otelcol_exporter_send_failed";
const PROCESSOR_DROPPED: &str = "otelcol_processor_dropped";

/// Suffix of each OTel metric family and the canonical signal it maps to.
const SUFFIXES: [(&str, Signal); 3] = [
    ("spans", Signal::Traces),
    ("metric_points", Signal::Metrics),
    ("log_records", Signal::Logs),
];

pub struct OtelcolScraper {
    src: Source,
    client: reqwest::Client,
}

impl OtelcolScraper {
    pub fn new(src: Source, client: reqwest::Client) -> Self {
        Self { src, client }
    }
}

#[async_trait]
impl Scrape for OtelcolScraper {
    /// Fetches the collector's internal Prometheus endpoint and returns
    /// received/dropped counts per signal type.
    ///
    /// Dropped items are exporter send failures plus processor drops.
    /// Receiver refusals are tracked in `extra["receiver_refused_*"]` for
    /// diagnostics but excluded from the drop count — refused items never
    /// entered the pipeline.
    async fn scrape(&self) -> ScrapeResult {
        let mut res = ScrapeResult::new(&self.src.id, self.src.kind);

        let fams = match fetch_families(&self.client, &self.src).await {
            Ok(fams) => fams,
            Err(err) => {
                warn!("scraper: otelcol fetch failed: source={} err={err}", self.src.id);
                res.error = Some(format!("otelcol scrape {:?}: {err}", self.src.id));
                return res;
            }
        };

        for (suffix, signal) in SUFFIXES {
            let accepted = fams.get(&format!("{RECEIVER_ACCEPTED}_{suffix}_total"));
            let refused = fams.get(&format!("{RECEIVER_REFUSED}_{suffix}_total"));
            let sent = fams.get(&format!("{EXPORTER_SENT}_{suffix}_total"));
            let failed = fams.get(&format!("{EXPORTER_FAILED}_{suffix}_total"));
            let proc_dropped = fams.get(&format!("{PROCESSOR_DROPPED}_{suffix}_total"));

            *res.received.entry(signal).or_insert(0.0) += accepted;

            // Dropped = exporter failures + processor drops. Using
            // (accepted - sent) instead would go negative across counter
            // resets.
            *res.dropped.entry(signal).or_insert(0.0) += failed + proc_dropped;

            res.extra.insert(format!("receiver_accepted_{suffix}"), accepted);
            res.extra.insert(format!("receiver_refused_{suffix}"), refused);
            res.extra.insert(format!("exporter_sent_{suffix}"), sent);
            res.extra.insert(format!("exporter_send_failed_{suffix}"), failed);
            res.extra.insert(format!("processor_dropped_{suffix}"), proc_dropped);
        }

        // Queue depth gauges — backpressure shows here before drops start.
        res.extra.insert(
            "exporter_queue_size".into(),
            fams.get("otelcol_exporter_queue_size"),
        );
        res.extra.insert(
            "exporter_queue_capacity".into(),
            fams.get("otelcol_exporter_queue_capacity"),
        );

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, SourceType, TlsConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "\
# TYPE otelcol_receiver_accepted_spans_total counter\n\
otelcol_receiver_accepted_spans_total{receiver=\"otlp\"} 1000\n\
otelcol_receiver_accepted_spans_total{receiver=\"jaeger\"} 200\n\
otelcol_receiver_refused_spans_total{receiver=\"otlp\"} 30\n\
otelcol_exporter_sent_spans_total{exporter=\"otlp\"} 1100\n\
otelcol_exporter_send_failed_spans_total{exporter=\"otlp\"} 40\n\
otelcol_processor_dropped_spans_total{processor=\"batch\"} 10\n\
otelcol_receiver_accepted_log_records_total{receiver=\"filelog\"} 500\n\
otelcol_exporter_send_failed_log_records_total{exporter=\"loki\"} 5\n\
otelcol_exporter_queue_size 128\n\
otelcol_exporter_queue_capacity 512\n";

    async fn scrape_body(body: &str) -> ScrapeResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let src = Source {
            id: "otel-1".into(),
            kind: SourceType::Otelcol,
            endpoint: format!("{}/metrics", server.uri()),
            auth: AuthConfig::default(),
            tls: TlsConfig::default(),
        };
        let scraper = OtelcolScraper::new(src.clone(), reqwest::Client::new());
        scraper.scrape().await
    }

    #[tokio::test]
    async fn normalizes_spans_and_logs() {
        let res = scrape_body(BODY).await;
        assert!(res.is_success());

        // Accepted sums across receivers; refused is not a drop.
        assert_eq!(res.received[&Signal::Traces], 1200.0);
        assert_eq!(res.dropped[&Signal::Traces], 50.0);

        assert_eq!(res.received[&Signal::Logs], 500.0);
        assert_eq!(res.dropped[&Signal::Logs], 5.0);

        // No metric_points in the body — zero, not absent.
        assert_eq!(res.received[&Signal::Metrics], 0.0);
    }

    #[tokio::test]
    async fn refusals_and_queue_gauges_land_in_extra() {
        let res = scrape_body(BODY).await;
        assert_eq!(res.extra["receiver_refused_spans"], 30.0);
        assert_eq!(res.extra["exporter_sent_spans"], 1100.0);
        assert_eq!(res.extra["exporter_queue_size"], 128.0);
        assert_eq!(res.extra["exporter_queue_capacity"], 512.0);
    }

    #[tokio::test]
    async fn http_error_status_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let src = Source {
            id: "otel-1".into(),
            kind: SourceType::Otelcol,
            endpoint: format!("{}/metrics", server.uri()),
            auth: AuthConfig::default(),
            tls: TlsConfig::default(),
        };
        let res = OtelcolScraper::new(src, reqwest::Client::new()).scrape().await;
        assert!(!res.is_success());
        assert!(res.error.as_deref().unwrap().contains("503"));
    }
}
