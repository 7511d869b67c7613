//! The stateful delta-to-rate transformer.
//!
//! One [`Engine`] serves every source: it keeps the previous successful
//! scrape per source and derives per-minute rates from counter deltas.
//! A counter that goes backwards (component restart) yields a zero delta,
//! never a negative or absurdly large one.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::compute::score::{self, HealthState};
use crate::config::SourceType;
use crate::scraper::{ScrapeResult, Signal, SIGNALS};

/// Number of recent scrape outcomes tracked for the uptime percentage.
const UPTIME_WINDOW: usize = 20;

/// The fully-derived health snapshot for one pipeline source, ready to be
/// handed to the shipper.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source_id: String,
    pub source_type: SourceType,
    pub timestamp: DateTime<Utc>,
    pub state: HealthState,
    pub drop_pct: f64,
    pub recovery_rate: f64,
    /// Total items received per minute across all signal types.
    pub throughput_per_min: f64,
    pub strength_score: f64,
    pub uptime_pct: f64,
    /// Per-signal breakdown; only signals that saw traffic appear.
    pub signals: Vec<SignalStats>,
    /// Present when the scrape failed; forwarded to the server verbatim.
    pub error_message: Option<String>,
    /// Gauges copied as-is plus derived `*_pm` counter rates.
    pub extra: HashMap<String, f64>,
}

/// Per-signal-type breakdown included in [`Snapshot::signals`].
#[derive(Debug, Clone, Copy)]
pub struct SignalStats {
    pub signal: Signal,
    pub received_pm: f64,
    pub dropped_pm: f64,
    pub drop_pct: f64,
}

/// Maintains per-source state across scrape cycles and derives health
/// metrics from raw counter deltas. Safe for concurrent use; the lock is
/// held only for the O(signals) duration of one `process` call, never
/// across I/O.
pub struct Engine {
    states: Mutex<HashMap<String, SourceState>>,
}

struct SourceState {
    prev: Option<ScrapeResult>,
    prev_time: DateTime<Utc>,
    has_baseline: bool,
    /// Rolling window of scrape outcomes, newest last.
    history: VecDeque<bool>,
}

impl SourceState {
    fn new() -> Self {
        Self {
            prev: None,
            prev_time: DateTime::<Utc>::MIN_UTC,
            has_baseline: false,
            history: VecDeque::with_capacity(UPTIME_WINDOW),
        }
    }

    fn record_scrape(&mut self, success: bool) {
        if self.history.len() >= UPTIME_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    fn uptime_pct(&self) -> f64 {
        if self.history.is_empty() {
            // Assume up before the first observation.
            return 100.0;
        }
        let ok = self.history.iter().filter(|s| **s).count();
        ok as f64 / self.history.len() as f64 * 100.0
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Ingests one scrape result and returns the derived snapshot.
    ///
    /// `now` is passed explicitly so callers (and tests) control the clock
    /// without sleeping; use `Utc::now()` in production.
    ///
    /// The first call for a source records baseline counters and returns an
    /// `unknown` snapshot — rates cannot be computed without a delta. A
    /// failed scrape never advances the baseline.
    pub fn process(&self, res: &ScrapeResult, now: DateTime<Utc>) -> Snapshot {
        let mut states = self.states.lock().unwrap();

        let st = states
            .entry(res.source_id.clone())
            .or_insert_with(SourceState::new);
        let success = res.is_success();
        st.record_scrape(success);

        // Base snapshot — callers always get something back.
        let mut out = Snapshot {
            source_id: res.source_id.clone(),
            source_type: res.source_type,
            timestamp: now,
            state: HealthState::Unknown,
            drop_pct: 0.0,
            recovery_rate: 0.0,
            throughput_per_min: 0.0,
            strength_score: 0.0,
            uptime_pct: st.uptime_pct(),
            signals: Vec::new(),
            error_message: None,
            extra: HashMap::new(),
        };

        if !success {
            warn!(
                "compute: scrape failed, marking unknown: source={} err={}",
                res.source_id,
                res.error.as_deref().unwrap_or("")
            );
            out.error_message = res.error.clone();
            return out;
        }

        if !st.has_baseline {
            // First successful scrape — store counters but stay unknown.
            st.prev = Some(res.clone());
            st.prev_time = now;
            st.has_baseline = true;
            return out;
        }

        // Floor the elapsed time at one minute so back-to-back scrapes and
        // retrograde clocks cannot produce unbounded per-minute rates.
        let elapsed = ((now - st.prev_time).num_milliseconds() as f64 / 60_000.0).max(1.0);

        let Some(prev) = st.prev.as_ref() else {
            return out;
        };

        let mut total_recv_delta = 0.0;
        let mut total_drop_delta = 0.0;

        for sig in SIGNALS {
            let recv_delta = delta_of(
                res.received.get(&sig).copied().unwrap_or(0.0),
                prev.received.get(&sig).copied().unwrap_or(0.0),
            );
            let drop_delta = delta_of(
                res.dropped.get(&sig).copied().unwrap_or(0.0),
                prev.dropped.get(&sig).copied().unwrap_or(0.0),
            );

            total_recv_delta += recv_delta;
            total_drop_delta += drop_delta;

            let total = recv_delta + drop_delta;
            if total > 0.0 {
                out.signals.push(SignalStats {
                    signal: sig,
                    received_pm: recv_delta / elapsed,
                    dropped_pm: drop_delta / elapsed,
                    drop_pct: drop_delta / total * 100.0,
                });
            }
        }

        let total_delta = total_recv_delta + total_drop_delta;
        if total_delta > 0.0 {
            out.drop_pct = total_drop_delta / total_delta * 100.0;
        }
        out.throughput_per_min = total_recv_delta / elapsed;

        // First-order proxy: the share of pipeline traffic that was not
        // dropped. A precise signal would need explicit retry-success
        // counters, which the components do not expose uniformly.
        out.recovery_rate = 100.0 - out.drop_pct;

        let scored = score::compute(score::Input {
            drop_pct: out.drop_pct,
            recovery_rate: out.recovery_rate,
            uptime_pct: out.uptime_pct,
            // Latency inputs stay zero until sources expose export latency;
            // the latency factor then defaults to full credit.
            ..score::Input::default()
        });
        out.state = scored.state;
        out.strength_score = scored.score;

        // Extras: fields ending in _size or _capacity are gauges (current
        // value, copied as-is); everything else is a monotonic counter and
        // becomes a <key>_pm rate.
        if !res.extra.is_empty() {
            out.extra.reserve(res.extra.len());
            for (key, value) in &res.extra {
                if key.ends_with("_size") || key.ends_with("_capacity") {
                    out.extra.insert(key.clone(), *value);
                } else {
                    let prev_value = prev.extra.get(key).copied().unwrap_or(0.0);
                    out.extra
                        .insert(format!("{key}_pm"), delta_of(*value, prev_value) / elapsed);
                }
            }
        }

        st.prev = Some(res.clone());
        st.prev_time = now;
        out
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Positive counter delta between current and previous. A counter reset
/// after a component restart shows up as `current < previous` and yields 0.
fn delta_of(current: f64, previous: f64) -> f64 {
    let d = current - previous;
    if d < 0.0 {
        0.0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn minutes_after(m: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::minutes(m)
    }

    fn success(id: &str, received: &[(Signal, f64)], dropped: &[(Signal, f64)]) -> ScrapeResult {
        let mut res = ScrapeResult::new(id, SourceType::Otelcol);
        res.received = received.iter().copied().collect();
        res.dropped = dropped.iter().copied().collect();
        res
    }

    fn failure(id: &str) -> ScrapeResult {
        ScrapeResult::failed(id, SourceType::Otelcol, "connection refused")
    }

    #[test]
    fn first_scrape_is_unknown_and_stores_baseline() {
        let engine = Engine::new();
        let snap = engine.process(&success("s", &[(Signal::Traces, 100.0)], &[]), t0());
        assert_eq!(snap.state, HealthState::Unknown);
        assert!(snap.signals.is_empty());
        assert_eq!(snap.uptime_pct, 100.0);

        // The baseline must be live: a second scrape computes a delta.
        let snap = engine.process(
            &success("s", &[(Signal::Traces, 160.0)], &[]),
            minutes_after(1),
        );
        assert_eq!(snap.throughput_per_min, 60.0);
    }

    #[test]
    fn two_scrapes_one_minute_apart() {
        // Seed: received 500/100 and dropped 50/10 across traces/metrics.
        let engine = Engine::new();
        engine.process(
            &success(
                "s",
                &[(Signal::Traces, 1000.0), (Signal::Metrics, 2000.0)],
                &[(Signal::Traces, 100.0), (Signal::Metrics, 200.0)],
            ),
            t0(),
        );
        let snap = engine.process(
            &success(
                "s",
                &[(Signal::Traces, 1500.0), (Signal::Metrics, 2100.0)],
                &[(Signal::Traces, 150.0), (Signal::Metrics, 210.0)],
            ),
            minutes_after(1),
        );

        assert!((snap.drop_pct - 60.0 / 660.0 * 100.0).abs() < 1e-9);
        assert_eq!(snap.throughput_per_min, 600.0);
        assert_eq!(snap.signals.len(), 2);
        assert!((snap.recovery_rate - (100.0 - snap.drop_pct)).abs() < 1e-12);

        let traces = snap
            .signals
            .iter()
            .find(|s| s.signal == Signal::Traces)
            .unwrap();
        assert_eq!(traces.received_pm, 500.0);
        assert_eq!(traces.dropped_pm, 50.0);
    }

    #[test]
    fn failed_scrape_does_not_advance_baseline() {
        // Seed: success, failure, then success 2 minutes after the first —
        // the delta spans the failure.
        let engine = Engine::new();
        engine.process(&success("s", &[(Signal::Logs, 1000.0)], &[]), t0());

        let snap = engine.process(&failure("s"), minutes_after(1));
        assert_eq!(snap.state, HealthState::Unknown);
        assert_eq!(snap.error_message.as_deref(), Some("connection refused"));
        assert!(snap.signals.is_empty());

        let snap = engine.process(
            &success("s", &[(Signal::Logs, 1500.0)], &[]),
            minutes_after(2),
        );
        assert!((snap.throughput_per_min - 250.0).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_clamps_to_zero_delta() {
        // Seed: counters go 100000 -> 50 between scrapes (restart).
        let engine = Engine::new();
        engine.process(&success("s", &[(Signal::Metrics, 100_000.0)], &[]), t0());
        let snap = engine.process(
            &success("s", &[(Signal::Metrics, 50.0)], &[]),
            minutes_after(1),
        );
        assert_eq!(snap.drop_pct, 0.0);
        assert_eq!(snap.throughput_per_min, 0.0);
        assert!(snap.signals.is_empty());
    }

    #[test]
    fn no_traffic_yields_empty_signals_and_zero_throughput() {
        let engine = Engine::new();
        let readings = [(Signal::Traces, 500.0), (Signal::Logs, 300.0)];
        engine.process(&success("s", &readings, &[]), t0());
        let snap = engine.process(&success("s", &readings, &[]), minutes_after(1));
        assert!(snap.signals.is_empty());
        assert_eq!(snap.throughput_per_min, 0.0);
    }

    #[test]
    fn perfect_pipeline_is_healthy_at_100() {
        let engine = Engine::new();
        engine.process(&success("s", &[(Signal::Traces, 100.0)], &[]), t0());
        let snap = engine.process(
            &success("s", &[(Signal::Traces, 700.0)], &[]),
            minutes_after(1),
        );
        assert!((snap.strength_score - 100.0).abs() < 1e-9);
        assert_eq!(snap.state, HealthState::Healthy);
    }

    #[test]
    fn heavy_drop_is_critical() {
        // 90% of traffic dropped.
        let engine = Engine::new();
        engine.process(
            &success("s", &[(Signal::Logs, 0.0)], &[(Signal::Logs, 0.0)]),
            t0(),
        );
        let snap = engine.process(
            &success("s", &[(Signal::Logs, 100.0)], &[(Signal::Logs, 900.0)]),
            minutes_after(1),
        );
        assert!((snap.drop_pct - 90.0).abs() < 1e-9);
        assert_eq!(snap.state, HealthState::Critical);
    }

    #[test]
    fn elapsed_floors_at_one_minute() {
        // Ten seconds between scrapes must not multiply rates by six.
        let engine = Engine::new();
        engine.process(&success("s", &[(Signal::Traces, 0.0)], &[]), t0());
        let snap = engine.process(
            &success("s", &[(Signal::Traces, 600.0)], &[]),
            t0() + chrono::Duration::seconds(10),
        );
        assert_eq!(snap.throughput_per_min, 600.0);

        // A retrograde clock gets the same floor.
        let snap = engine.process(
            &success("s", &[(Signal::Traces, 1200.0)], &[]),
            t0() - chrono::Duration::minutes(5),
        );
        assert_eq!(snap.throughput_per_min, 600.0);
    }

    #[test]
    fn uptime_window_tracks_recent_outcomes() {
        let engine = Engine::new();

        // All failures: window fills with false, uptime 0.
        for i in 0..UPTIME_WINDOW as i64 {
            engine.process(&failure("down"), minutes_after(i));
        }
        let snap = engine.process(&failure("down"), minutes_after(21));
        assert_eq!(snap.uptime_pct, 0.0);

        // All successes on another source: 100.
        let mut last = None;
        for i in 0..=UPTIME_WINDOW as i64 {
            last = Some(engine.process(
                &success("up", &[(Signal::Logs, i as f64)], &[]),
                minutes_after(i),
            ));
        }
        assert_eq!(last.unwrap().uptime_pct, 100.0);
    }

    #[test]
    fn uptime_window_is_bounded_at_twenty() {
        let engine = Engine::new();
        // 20 failures then 10 successes: window holds 10 false + 10 true.
        for i in 0..20 {
            engine.process(&failure("s"), minutes_after(i));
        }
        let mut snap = None;
        for i in 20..30 {
            snap = Some(engine.process(
                &success("s", &[(Signal::Logs, i as f64)], &[]),
                minutes_after(i),
            ));
        }
        assert_eq!(snap.unwrap().uptime_pct, 50.0);
    }

    #[test]
    fn extra_gauges_copied_and_counters_become_rates() {
        let engine = Engine::new();

        let mut first = success("s", &[(Signal::Metrics, 0.0)], &[]);
        first.extra.insert("queue_size".into(), 100.0);
        first.extra.insert("queue_capacity".into(), 512.0);
        first.extra.insert("wal_errors".into(), 10.0);
        engine.process(&first, t0());

        let mut second = success("s", &[(Signal::Metrics, 60.0)], &[]);
        second.extra.insert("queue_size".into(), 140.0);
        second.extra.insert("queue_capacity".into(), 512.0);
        second.extra.insert("wal_errors".into(), 16.0);
        let snap = engine.process(&second, minutes_after(2));

        // Gauges: copied as-is under the original key.
        assert_eq!(snap.extra["queue_size"], 140.0);
        assert_eq!(snap.extra["queue_capacity"], 512.0);
        // Counter: delta 6 over 2 minutes.
        assert_eq!(snap.extra["wal_errors_pm"], 3.0);
        assert!(!snap.extra.contains_key("wal_errors"));
    }

    #[test]
    fn score_and_percentages_stay_in_range() {
        let engine = Engine::new();
        let cases: &[(f64, f64)] = &[
            (0.0, 0.0),
            (1e12, 0.0),
            (0.0, 1e12),
            (5.0, 1e9),
            (f64::MAX / 4.0, 1.0),
        ];
        engine.process(&success("s", &[(Signal::Logs, 1.0)], &[(Signal::Logs, 1.0)]), t0());
        for (i, (recv, drop)) in cases.iter().enumerate() {
            let snap = engine.process(
                &success("s", &[(Signal::Logs, *recv)], &[(Signal::Logs, *drop)]),
                minutes_after(i as i64 + 1),
            );
            assert!((0.0..=100.0).contains(&snap.strength_score), "score {}", snap.strength_score);
            assert!((0.0..=100.0).contains(&snap.drop_pct));
            assert!((0.0..=100.0).contains(&snap.uptime_pct));
        }
    }

    #[test]
    fn sources_do_not_share_state() {
        let engine = Engine::new();
        engine.process(&success("a", &[(Signal::Logs, 100.0)], &[]), t0());
        // First scrape of "b" is a baseline even though "a" already has one.
        let snap = engine.process(&success("b", &[(Signal::Logs, 500.0)], &[]), t0());
        assert_eq!(snap.state, HealthState::Unknown);
        assert!(snap.signals.is_empty());
    }
}
