//! Conversion from the compute engine's snapshot into the wire message.

use crate::compute::Snapshot;
use crate::proto;

/// Builds the `PipelineSnapshot` protobuf message for one derived snapshot,
/// attaching any certificate statuses gathered for the source this cycle.
///
/// Latency percentiles stay at their zero values until sources expose
/// export latency data.
pub fn to_proto(snap: &Snapshot, certs: Vec<proto::CertStatus>) -> proto::PipelineSnapshot {
    proto::PipelineSnapshot {
        source_id: snap.source_id.clone(),
        source_type: snap.source_type.as_str().to_string(),
        timestamp_unix: snap.timestamp.timestamp(),
        state: snap.state.as_str().to_string(),
        drop_pct: snap.drop_pct,
        recovery_rate: snap.recovery_rate,
        throughput_per_min: snap.throughput_per_min,
        latency_p50_ms: 0.0,
        latency_p95_ms: 0.0,
        latency_p99_ms: 0.0,
        strength_score: snap.strength_score,
        uptime_pct: snap.uptime_pct,
        error_message: snap.error_message.clone().unwrap_or_default(),
        signals: snap
            .signals
            .iter()
            .map(|s| proto::SignalStats {
                r#type: s.signal.as_str().to_string(),
                received_pm: s.received_pm,
                dropped_pm: s.dropped_pm,
                drop_pct: s.drop_pct,
            })
            .collect(),
        extra: snap.extra.clone().into_iter().collect(),
        certs,
    }
}
