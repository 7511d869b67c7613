//! JSON response shapes for the REST surface and the WebSocket broadcast.

use chrono::Utc;
use serde::Serialize;

use crate::api::diagnostics::{diagnostics, DiagnosticHint};
use crate::compute::score::state_from_score;
use crate::store::{Entry, Store};

/// Payload for `GET /api/v1/health`.
#[derive(Debug, Default, Serialize)]
pub struct HealthResponse {
    pub overall_score: f64,
    pub state: String,
    pub pipeline_count: usize,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub critical_count: usize,
    pub unknown_count: usize,
    pub alert_count: usize,
}

/// One pipeline entry in `GET /api/v1/pipelines` and the broadcast payload.
#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub source_id: String,
    pub source_type: String,
    pub state: String,
    pub drop_pct: f64,
    pub recovery_rate: f64,
    pub throughput_per_min: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub strength_score: f64,
    pub uptime_pct: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub signals: Vec<SignalResponse>,
    pub certs: Vec<CertResponse>,
    pub diagnostics: Vec<DiagnosticHint>,
    /// RFC 3339 time the store last received this source.
    pub last_seen: String,
}

/// One signal type's stats within a pipeline.
#[derive(Debug, Serialize)]
pub struct SignalResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub received_pm: f64,
    pub dropped_pm: f64,
    pub drop_pct: f64,
}

/// One certificate status within a pipeline (and `GET /api/v1/certs`).
#[derive(Debug, Serialize)]
pub struct CertResponse {
    pub source_id: String,
    pub endpoint: String,
    pub status: String,
    pub not_after: String,
    pub days_left: i32,
    pub issuer: String,
    pub auth_type: String,
}

/// Totals for one signal type across all live pipelines.
#[derive(Debug, Default, Serialize)]
pub struct SignalAggregate {
    pub received_pm: f64,
    pub dropped_pm: f64,
    pub drop_pct: f64,
}

/// Payload for `GET /api/v1/signals`.
#[derive(Debug, Default, Serialize)]
pub struct SignalsResponse {
    pub metrics: SignalAggregate,
    pub logs: SignalAggregate,
    pub traces: SignalAggregate,
}

/// Payload for `GET /api/v1/snapshot` and every WebSocket broadcast.
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub pipelines: Vec<PipelineResponse>,
    /// RFC 3339 build time.
    pub generated_at: String,
}

/// Projects one store entry into its API shape.
pub fn to_pipeline_response(entry: &Entry) -> PipelineResponse {
    let snap = entry.snapshot.as_ref();
    PipelineResponse {
        source_id: snap.source_id.clone(),
        source_type: snap.source_type.clone(),
        state: snap.state.clone(),
        drop_pct: snap.drop_pct,
        recovery_rate: snap.recovery_rate,
        throughput_per_min: snap.throughput_per_min,
        latency_p50_ms: snap.latency_p50_ms,
        latency_p95_ms: snap.latency_p95_ms,
        latency_p99_ms: snap.latency_p99_ms,
        strength_score: snap.strength_score,
        uptime_pct: snap.uptime_pct,
        error_message: snap.error_message.clone(),
        signals: snap
            .signals
            .iter()
            .map(|s| SignalResponse {
                kind: s.r#type.clone(),
                received_pm: s.received_pm,
                dropped_pm: s.dropped_pm,
                drop_pct: s.drop_pct,
            })
            .collect(),
        certs: snap
            .certs
            .iter()
            .map(|c| CertResponse {
                source_id: snap.source_id.clone(),
                endpoint: c.endpoint.clone(),
                status: c.status.clone(),
                not_after: c.not_after.clone(),
                days_left: c.days_left,
                issuer: c.issuer.clone(),
                auth_type: c.auth_type.clone(),
            })
            .collect(),
        diagnostics: diagnostics(snap),
        last_seen: entry.updated_at.to_rfc3339(),
    }
}

/// Builds the full dashboard snapshot from the store's live entries.
pub fn build_snapshot(store: &Store) -> SnapshotResponse {
    let mut entries = store.list();
    entries.sort_by(|a, b| a.snapshot.source_id.cmp(&b.snapshot.source_id));
    SnapshotResponse {
        pipelines: entries.iter().map(to_pipeline_response).collect(),
        generated_at: Utc::now().to_rfc3339(),
    }
}

/// Builds the fleet-wide health summary from the store's live entries.
pub fn build_health(store: &Store, alert_count: usize) -> HealthResponse {
    let entries = store.list();
    let mut resp = HealthResponse {
        pipeline_count: entries.len(),
        alert_count,
        ..HealthResponse::default()
    };

    if entries.is_empty() {
        resp.state = "unknown".into();
        return resp;
    }

    let mut total = 0.0;
    for e in &entries {
        total += e.snapshot.strength_score;
        match e.snapshot.state.as_str() {
            "healthy" => resp.healthy_count += 1,
            "degraded" => resp.degraded_count += 1,
            "critical" => resp.critical_count += 1,
            _ => resp.unknown_count += 1,
        }
    }

    resp.overall_score = total / entries.len() as f64;
    resp.state = state_from_score(resp.overall_score).as_str().into();
    resp
}

/// Aggregates per-signal rates across the store's live entries.
pub fn build_signals(store: &Store) -> SignalsResponse {
    let mut totals: [(f64, f64); 3] = [(0.0, 0.0); 3]; // (received, dropped)

    for entry in store.list() {
        for sig in &entry.snapshot.signals {
            let slot = match sig.r#type.as_str() {
                "metrics" => 0,
                "logs" => 1,
                "traces" => 2,
                _ => continue,
            };
            totals[slot].0 += sig.received_pm;
            totals[slot].1 += sig.dropped_pm;
        }
    }

    let aggregate = |(received, dropped): (f64, f64)| {
        let sum = received + dropped;
        SignalAggregate {
            received_pm: received,
            dropped_pm: dropped,
            drop_pct: if sum > 0.0 { dropped / sum * 100.0 } else { 0.0 },
        }
    };

    SignalsResponse {
        metrics: aggregate(totals[0]),
        logs: aggregate(totals[1]),
        traces: aggregate(totals[2]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PipelineSnapshot, SignalStats};
    use std::time::Duration;

    fn store_with(snaps: Vec<PipelineSnapshot>) -> Store {
        let store = Store::new(Duration::from_secs(60));
        for s in snaps {
            store.put(s);
        }
        store
    }

    fn snap(id: &str, state: &str, score: f64) -> PipelineSnapshot {
        PipelineSnapshot {
            source_id: id.into(),
            source_type: "otelcol".into(),
            state: state.into(),
            strength_score: score,
            ..PipelineSnapshot::default()
        }
    }

    #[test]
    fn health_counts_states_and_averages_scores() {
        let store = store_with(vec![
            snap("a", "healthy", 95.0),
            snap("b", "degraded", 70.0),
            snap("c", "critical", 30.0),
            snap("d", "unknown", 0.0),
        ]);
        let health = build_health(&store, 2);

        assert_eq!(health.pipeline_count, 4);
        assert_eq!(health.healthy_count, 1);
        assert_eq!(health.degraded_count, 1);
        assert_eq!(health.critical_count, 1);
        assert_eq!(health.unknown_count, 1);
        assert_eq!(health.alert_count, 2);
        assert!((health.overall_score - 48.75).abs() < 1e-9);
        assert_eq!(health.state, "critical");
    }

    #[test]
    fn empty_store_health_is_unknown() {
        let store = store_with(vec![]);
        let health = build_health(&store, 0);
        assert_eq!(health.state, "unknown");
        assert_eq!(health.pipeline_count, 0);
    }

    #[test]
    fn signals_aggregate_across_pipelines() {
        let mut a = snap("a", "healthy", 90.0);
        a.signals = vec![SignalStats {
            r#type: "logs".into(),
            received_pm: 100.0,
            dropped_pm: 25.0,
            drop_pct: 20.0,
        }];
        let mut b = snap("b", "healthy", 90.0);
        b.signals = vec![
            SignalStats {
                r#type: "logs".into(),
                received_pm: 200.0,
                dropped_pm: 75.0,
                drop_pct: 27.0,
            },
            SignalStats {
                r#type: "traces".into(),
                received_pm: 50.0,
                dropped_pm: 0.0,
                drop_pct: 0.0,
            },
        ];

        let signals = build_signals(&store_with(vec![a, b]));
        assert_eq!(signals.logs.received_pm, 300.0);
        assert_eq!(signals.logs.dropped_pm, 100.0);
        assert!((signals.logs.drop_pct - 25.0).abs() < 1e-9);
        assert_eq!(signals.traces.received_pm, 50.0);
        assert_eq!(signals.metrics.received_pm, 0.0);
        assert_eq!(signals.metrics.drop_pct, 0.0);
    }

    #[test]
    fn snapshot_orders_pipelines_by_source_id() {
        let store = store_with(vec![
            snap("zeta", "healthy", 90.0),
            snap("alpha", "healthy", 90.0),
        ]);
        let resp = build_snapshot(&store);
        let ids: Vec<&str> = resp.pipelines.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(!resp.generated_at.is_empty());
    }
}
