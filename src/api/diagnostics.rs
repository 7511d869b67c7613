//! Human-readable diagnostic hints derived from a snapshot.
//!
//! The UI renders these as chips on each pipeline card; the detail text is
//! shown on click. Pure function of the snapshot — no state, no I/O.

use serde::Serialize;

use crate::proto::PipelineSnapshot;

/// One insight about a pipeline's health. Ordered critical-first in the
/// output.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticHint {
    /// Stable machine-readable identifier.
    pub key: String,
    /// One of: ok | info | warning | critical.
    pub level: String,
    /// Short chip label.
    pub title: String,
    /// Full explanation.
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl DiagnosticHint {
    fn new(key: &str, level: &str, title: String, detail: String) -> Self {
        Self {
            key: key.into(),
            level: level.into(),
            title,
            detail,
            value: None,
        }
    }

    fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Derives the ordered hint list for one snapshot.
pub fn diagnostics(snap: &PipelineSnapshot) -> Vec<DiagnosticHint> {
    let mut hints = Vec::new();

    // A failed scrape preempts everything else — there is no data to
    // reason about.
    if !snap.error_message.is_empty() {
        hints.push(DiagnosticHint::new(
            "scrape_failed",
            "critical",
            "Can't reach source".into(),
            format!(
                "The agent couldn't collect data from this source. It last tried and got: \
                 \"{}\". Check that the endpoint is reachable, the credentials are correct \
                 and the service is running. Until then all health metrics for this \
                 pipeline are unavailable.",
                snap.error_message
            ),
        ));
        return hints;
    }

    // First scrape: no baseline yet, nothing derived.
    if snap.state == "unknown" && snap.drop_pct == 0.0 && snap.throughput_per_min == 0.0 {
        hints.push(DiagnosticHint::new(
            "warming_up",
            "info",
            "Warming up".into(),
            "The agent is collecting its first data point. Health metrics come from the \
             delta between two consecutive scrapes, so everything shows up after the next \
             cycle. No action needed."
                .into(),
        ));
        return hints;
    }

    if snap.drop_pct > 0.0 {
        hints.push(drop_rate_hint(snap));
    }

    if snap.drop_pct > 0.0 && snap.recovery_rate > 0.0 && snap.recovery_rate < 100.0 {
        hints.push(
            DiagnosticHint::new(
                "recovery_rate",
                "info",
                format!("{:.0}% recovery", snap.recovery_rate),
                format!(
                    "Of the data that was at risk, {:.0}% is getting through. A rate below \
                     80% means a significant portion is permanently lost.",
                    snap.recovery_rate
                ),
            )
            .with_value(snap.recovery_rate),
        );
    }

    if snap.uptime_pct < 100.0 && snap.uptime_pct > 0.0 {
        let level = if snap.uptime_pct < 70.0 {
            "critical"
        } else if snap.uptime_pct < 90.0 {
            "warning"
        } else {
            "info"
        };
        hints.push(
            DiagnosticHint::new(
                "uptime",
                level,
                format!("{:.0}% uptime", snap.uptime_pct),
                format!(
                    "This pipeline answered {:.0}% of the last 20 scrape attempts. A brief \
                     dip is often a rolling restart; a sustained dip means instability. \
                     Look for pod restarts, OOMKilled events or network issues.",
                    snap.uptime_pct
                ),
            )
            .with_value(snap.uptime_pct),
        );
    }

    // Per-signal breakdown pinpoints which signal type is under pressure.
    for sig in &snap.signals {
        if sig.drop_pct < 0.01 {
            continue;
        }
        let name = match sig.r#type.as_str() {
            "metrics" => "metric samples",
            "logs" => "log lines",
            "traces" => "trace spans",
            other => other,
        };
        hints.push(
            DiagnosticHint::new(
                &format!("signal_drop_{}", sig.r#type),
                "warning",
                format!("{} drops", sig.r#type),
                format!(
                    "Your {name} see a {:.1}% drop rate ({:.0} dropped/min out of {:.0} \
                     received/min). One signal type can back up while the others stay \
                     healthy.",
                    sig.drop_pct, sig.dropped_pm, sig.received_pm
                ),
            )
            .with_value(sig.drop_pct),
        );
    }

    hints.extend(source_type_hints(snap));

    if hints.is_empty() {
        hints.push(
            DiagnosticHint::new(
                "healthy",
                "ok",
                "All clear".into(),
                format!(
                    "This pipeline is fully operational with a health score of {:.0}/100. \
                     No drops, no scrape errors, uptime solid. Watch the throughput trend: \
                     a sudden volume drop can mean an upstream problem even at zero drop \
                     rate.",
                    snap.strength_score
                ),
            )
            .with_value(snap.strength_score),
        );
    }

    hints
}

fn drop_rate_hint(snap: &PipelineSnapshot) -> DiagnosticHint {
    let pct = snap.drop_pct;
    let per_min = snap.throughput_per_min * (pct / 100.0);

    let (level, title, detail) = if pct >= 10.0 {
        (
            "critical",
            format!("{pct:.1}% data loss"),
            format!(
                "This pipeline is losing {pct:.1}% of its data, roughly {per_min:.0} items \
                 per minute. Common causes: remote storage overwhelmed, a full write queue, \
                 or a failing downstream exporter. Check the remote write targets and \
                 backend capacity."
            ),
        )
    } else if pct >= 1.0 {
        (
            "warning",
            format!("{pct:.1}% drop rate"),
            format!(
                "About {pct:.1}% of data is being dropped (≈ {per_min:.0} items/min). This \
                 often means a downstream system is under pressure or a queue is filling \
                 up. Watch whether it grows."
            ),
        )
    } else {
        (
            "info",
            format!("{pct:.2}% minor drops"),
            format!(
                "A very small amount of data ({pct:.2}%) is being dropped. May be normal \
                 jitter; keep an eye on it."
            ),
        )
    };

    DiagnosticHint::new("drop_rate", level, title, detail).with_value(pct)
}

fn source_type_hints(snap: &PipelineSnapshot) -> Vec<DiagnosticHint> {
    match snap.source_type.as_str() {
        "otelcol" => otelcol_hints(snap),
        "fluentbit" => fluentbit_hints(snap),
        "prometheus" => {
            let mut hints = Vec::new();
            if snap.drop_pct > 0.0 {
                hints.push(DiagnosticHint::new(
                    "prom_remotewrite_tip",
                    "info",
                    "Remote write check".into(),
                    "For Prometheus drops, start with the remote write queue: compare \
                     samples_pending against queue_capacity. Above 80% full the remote \
                     backend is too slow. Also check wal_errors and shard saturation."
                        .into(),
                ));
            }
            if snap.uptime_pct < 100.0 {
                hints.push(DiagnosticHint::new(
                    "prom_restart_tip",
                    "info",
                    "Check Prometheus logs".into(),
                    "A restarting Prometheus replays its WAL before accepting scrapes, \
                     which leaves a brief gap. Common causes: OOM, storage full, or an \
                     aggressive liveness probe."
                        .into(),
                ));
            }
            hints
        }
        "loki" => {
            let mut hints = Vec::new();
            if snap.drop_pct > 0.0 {
                hints.push(DiagnosticHint::new(
                    "loki_flush_tip",
                    "info",
                    "Check Loki ingesters".into(),
                    "Loki drops usually mean the ingester can't flush chunks to storage. \
                     Check flush_errors and the ingestion rate limit; scaling storage or \
                     adding ingester replicas usually clears it."
                        .into(),
                ));
            }
            hints
        }
        _ => Vec::new(),
    }
}

/// OTel-Collector-specific hints from the extra map (queue gauges and
/// per-minute counter rates).
fn otelcol_hints(snap: &PipelineSnapshot) -> Vec<DiagnosticHint> {
    let ex = &snap.extra;
    let get = |k: &str| ex.get(k).copied().unwrap_or(0.0);
    let mut hints = Vec::new();

    let q_size = get("exporter_queue_size");
    let q_cap = get("exporter_queue_capacity");
    if q_cap > 0.0 {
        let fill = q_size / q_cap * 100.0;
        if fill >= 90.0 {
            hints.push(
                DiagnosticHint::new(
                    "otel_queue_critical",
                    "critical",
                    format!("Queue {fill:.0}% full"),
                    format!(
                        "The exporter queue is {fill:.0}% full ({q_size:.0} / {q_cap:.0} \
                         slots): the downstream backends cannot keep up and data will \
                         start dropping imminently. Scale the backend, raise \
                         sending_queue.queue_size, or add exporter workers."
                    ),
                )
                .with_value(fill),
            );
        } else if fill >= 70.0 {
            hints.push(
                DiagnosticHint::new(
                    "otel_queue_warning",
                    "warning",
                    format!("Queue {fill:.0}% full"),
                    format!(
                        "The exporter queue is {fill:.0}% full ({q_size:.0} / {q_cap:.0}). \
                         Backpressure is building; act before it reaches 90%."
                    ),
                )
                .with_value(fill),
            );
        } else if fill >= 30.0 {
            hints.push(
                DiagnosticHint::new(
                    "otel_queue_ok",
                    "info",
                    format!("Queue {fill:.0}% used"),
                    format!("The exporter queue is {fill:.0}% full ({q_size:.0} / {q_cap:.0}). Healthy headroom."),
                )
                .with_value(fill),
            );
        }
    }

    let refused_pm: f64 = ["spans", "metric_points", "log_records"]
        .iter()
        .map(|s| get(&format!("receiver_refused_{s}_pm")))
        .sum();
    if refused_pm > 0.5 {
        hints.push(
            DiagnosticHint::new(
                "otel_receiver_refused",
                "warning",
                format!("{refused_pm:.0} items/min refused"),
                format!(
                    "The collector is refusing {refused_pm:.0} items per minute at the \
                     receiver stage; they never entered the pipeline. Usually the \
                     memory_limiter protecting an overwhelmed collector. Raise memory \
                     limits or slow the upstream senders."
                ),
            )
            .with_value(refused_pm),
        );
    }

    let failed_pm: f64 = ["spans", "metric_points", "log_records"]
        .iter()
        .map(|s| get(&format!("exporter_send_failed_{s}_pm")))
        .sum();
    if failed_pm > 0.5 {
        hints.push(
            DiagnosticHint::new(
                "otel_export_failures",
                "critical",
                format!("{failed_pm:.0} exports/min failing"),
                format!(
                    "{failed_pm:.0} items per minute fail to export. Distinct from queue \
                     pressure: these were sent and rejected. Check exporter logs for \
                     auth failures, TLS errors, backend overload or connectivity."
                ),
            )
            .with_value(failed_pm),
        );
    }

    if snap.uptime_pct < 100.0 {
        hints.push(DiagnosticHint::new(
            "otel_restart_tip",
            "info",
            "Check collector logs".into(),
            "A restarting collector loses data buffered in memory unless the persistent \
             queue is enabled. Check the previous container logs for OOM or config \
             errors."
                .into(),
        ));
    }

    hints
}

/// Fluent-Bit-specific hints from the per-minute counter rates.
fn fluentbit_hints(snap: &PipelineSnapshot) -> Vec<DiagnosticHint> {
    let ex = &snap.extra;
    let get = |k: &str| ex.get(k).copied().unwrap_or(0.0);
    let mut hints = Vec::new();

    let lost_pm = get("output_retried_failed_pm");
    if lost_pm > 0.0 {
        hints.push(
            DiagnosticHint::new(
                "fb_data_loss",
                "critical",
                format!("{lost_pm:.0} records/min lost"),
                format!(
                    "Fluent Bit is permanently losing {lost_pm:.0} log records per minute; \
                     they failed an output and exhausted all retries. Check the output \
                     destination, and consider the filesystem buffer (storage.type \
                     filesystem) so records survive restarts."
                ),
            )
            .with_value(lost_pm),
        );
    }

    let errors_pm = get("output_errors_pm");
    if errors_pm > 0.5 {
        hints.push(
            DiagnosticHint::new(
                "fb_output_errors",
                "warning",
                format!("{errors_pm:.0} output errors/min"),
                format!(
                    "{errors_pm:.0} output errors per minute. Errors trigger retries, and \
                     retries that keep failing become permanent loss. Common causes: \
                     unreachable destination, auth failure, TLS, or rate limiting."
                ),
            )
            .with_value(errors_pm),
        );
    }

    let retries_pm = get("output_retries_pm");
    if retries_pm > 5.0 && lost_pm == 0.0 {
        hints.push(
            DiagnosticHint::new(
                "fb_retries",
                "info",
                format!("{retries_pm:.0} retries/min"),
                format!(
                    "Fluent Bit retries {retries_pm:.0} times per minute. No data lost \
                     yet, but sustained retries mean the destination is struggling; watch \
                     output_retried_failed_pm closely."
                ),
            )
            .with_value(retries_pm),
        );
    }

    let filter_pm = get("filter_drop_records_pm");
    if filter_pm > 0.0 {
        hints.push(
            DiagnosticHint::new(
                "fb_filter_drops",
                "info",
                format!("{filter_pm:.0} records/min filtered"),
                format!(
                    "{filter_pm:.0} records per minute are dropped by filter plugins. \
                     Normal if filtering rules are configured; verify they are not \
                     discarding logs you need."
                ),
            )
            .with_value(filter_pm),
        );
    }

    hints
}
