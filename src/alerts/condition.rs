//! The three-token alert condition language.
//!
//! A condition is `<field> <op> <value>`, whitespace-separated:
//!
//! ```text
//! drop_pct > 10
//! strength_score < 60
//! throughput < 100
//! uptime_pct < 99
//! latency_p95_ms > 500
//! latency_p99_ms > 1000
//! state == critical
//! cert_days_left < 14
//! ```
//!
//! A malformed expression, unknown field or unparseable number never fires;
//! that is a configuration error reported at startup, not at evaluate time.

use crate::proto::PipelineSnapshot;

/// Evaluates a condition against a snapshot. Returns whether it fires and
/// the triggering numeric value (0 for string comparisons).
pub fn eval(cond: &str, snap: &PipelineSnapshot) -> (bool, f64) {
    let parts: Vec<&str> = cond.split_whitespace().collect();
    let &[field, op, rhs] = parts.as_slice() else {
        return (false, 0.0);
    };

    match field {
        "state" => {
            // Only string equality is meaningful for states.
            if op == "==" {
                (snap.state == rhs, 0.0)
            } else {
                (false, 0.0)
            }
        }

        "cert_days_left" => {
            let Ok(threshold) = rhs.parse::<f64>() else {
                return (false, 0.0);
            };
            // Fires when any certificate on the snapshot matches.
            for cert in &snap.certs {
                let v = f64::from(cert.days_left);
                if compare(v, op, threshold) {
                    return (true, v);
                }
            }
            (false, 0.0)
        }

        _ => {
            let Some(v) = numeric_field(field, snap) else {
                return (false, 0.0);
            };
            let Ok(threshold) = rhs.parse::<f64>() else {
                return (false, 0.0);
            };
            (compare(v, op, threshold), v)
        }
    }
}

/// Maps a numeric field name to its snapshot value.
fn numeric_field(field: &str, snap: &PipelineSnapshot) -> Option<f64> {
    match field {
        "drop_pct" => Some(snap.drop_pct),
        "strength_score" => Some(snap.strength_score),
        "throughput" => Some(snap.throughput_per_min),
        "uptime_pct" => Some(snap.uptime_pct),
        "latency_p95_ms" => Some(snap.latency_p95_ms),
        "latency_p99_ms" => Some(snap.latency_p99_ms),
        _ => None,
    }
}

fn compare(v: f64, op: &str, threshold: f64) -> bool {
    match op {
        ">" => v > threshold,
        ">=" => v >= threshold,
        "<" => v < threshold,
        "<=" => v <= threshold,
        "==" => v == threshold,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::CertStatus;

    fn snap() -> PipelineSnapshot {
        PipelineSnapshot {
            source_id: "s".into(),
            state: "critical".into(),
            drop_pct: 25.0,
            strength_score: 55.0,
            throughput_per_min: 1200.0,
            uptime_pct: 98.0,
            latency_p95_ms: 750.0,
            ..PipelineSnapshot::default()
        }
    }

    #[test]
    fn numeric_comparisons() {
        assert_eq!(eval("drop_pct > 10", &snap()), (true, 25.0));
        assert_eq!(eval("drop_pct > 25", &snap()), (false, 25.0));
        assert_eq!(eval("drop_pct >= 25", &snap()), (true, 25.0));
        assert_eq!(eval("strength_score < 60", &snap()), (true, 55.0));
        assert_eq!(eval("throughput <= 1200", &snap()), (true, 1200.0));
        assert_eq!(eval("uptime_pct == 98", &snap()), (true, 98.0));
        assert_eq!(eval("latency_p95_ms > 500", &snap()), (true, 750.0));
    }

    #[test]
    fn state_equality_only() {
        assert_eq!(eval("state == critical", &snap()), (true, 0.0));
        assert_eq!(eval("state == healthy", &snap()), (false, 0.0));
        // Ordering operators are meaningless for states.
        assert_eq!(eval("state > critical", &snap()), (false, 0.0));
    }

    #[test]
    fn cert_days_left_matches_any_certificate() {
        let mut s = snap();
        s.certs = vec![
            CertStatus {
                days_left: 30,
                ..CertStatus::default()
            },
            CertStatus {
                days_left: 10,
                ..CertStatus::default()
            },
        ];
        // The 10-day cert triggers and reports its value.
        assert_eq!(eval("cert_days_left < 14", &s), (true, 10.0));
        assert_eq!(eval("cert_days_left < 5", &s), (false, 0.0));
    }

    #[test]
    fn no_certs_never_fires() {
        assert_eq!(eval("cert_days_left < 14", &snap()), (false, 0.0));
    }

    #[test]
    fn malformed_conditions_never_fire() {
        // Wrong token count.
        assert_eq!(eval("drop_pct >>", &snap()), (false, 0.0));
        assert_eq!(eval("drop_pct", &snap()), (false, 0.0));
        assert_eq!(eval("", &snap()), (false, 0.0));
        assert_eq!(eval("drop_pct > 10 extra", &snap()), (false, 0.0));
    }

    #[test]
    fn unknown_operator_never_fires() {
        assert_eq!(eval("drop_pct >> 10", &snap()), (false, 25.0));
        assert_eq!(eval("drop_pct != 10", &snap()), (false, 25.0));
    }

    #[test]
    fn unknown_field_never_fires() {
        assert_eq!(eval("nonsense > 10", &snap()), (false, 0.0));
    }

    #[test]
    fn unparseable_threshold_never_fires() {
        assert_eq!(eval("drop_pct > ten", &snap()), (false, 0.0));
        assert_eq!(eval("cert_days_left < soon", &snap()), (false, 0.0));
    }
}
