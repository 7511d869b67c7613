//! Property-based tests for engine and store invariants using proptest.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use obsidianstack::compute::Engine;
use obsidianstack::config::SourceType;
use obsidianstack::proto::PipelineSnapshot;
use obsidianstack::scraper::{ScrapeResult, Signal};
use obsidianstack::store::Store;

fn reading(received: f64, dropped: f64) -> ScrapeResult {
    let mut res = ScrapeResult::new("prop-source", SourceType::Otelcol);
    res.received = HashMap::from([(Signal::Traces, received)]);
    res.dropped = HashMap::from([(Signal::Traces, dropped)]);
    res
}

proptest! {
    /// For any pair of consecutive counter readings, every percentage
    /// output stays in [0, 100] and the score never escapes its range.
    #[test]
    fn engine_outputs_stay_bounded(
        recv_a in 0.0f64..1e15,
        drop_a in 0.0f64..1e15,
        recv_b in 0.0f64..1e15,
        drop_b in 0.0f64..1e15,
        gap_minutes in 0i64..10_000,
    ) {
        let engine = Engine::new();
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        engine.process(&reading(recv_a, drop_a), t0);
        let snap = engine.process(
            &reading(recv_b, drop_b),
            t0 + chrono::Duration::minutes(gap_minutes),
        );

        prop_assert!((0.0..=100.0).contains(&snap.strength_score));
        prop_assert!((0.0..=100.0).contains(&snap.drop_pct));
        prop_assert!((0.0..=100.0).contains(&snap.uptime_pct));
        prop_assert!(snap.throughput_per_min >= 0.0);
        prop_assert!(snap.throughput_per_min.is_finite());

        for sig in &snap.signals {
            prop_assert!((0.0..=100.0).contains(&sig.drop_pct));
            prop_assert!(sig.received_pm >= 0.0);
            prop_assert!(sig.dropped_pm >= 0.0);
        }
    }

    /// A counter that goes backwards (restart) must read as a zero delta,
    /// never as negative throughput.
    #[test]
    fn counter_resets_never_produce_negative_rates(
        before in 1.0f64..1e12,
        after in 0.0f64..1e12,
    ) {
        let engine = Engine::new();
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        engine.process(&reading(before, 0.0), t0);
        let snap = engine.process(&reading(after, 0.0), t0 + chrono::Duration::minutes(1));

        let expected = (after - before).max(0.0);
        prop_assert!((snap.throughput_per_min - expected).abs() < 1e-6);
    }

    /// Uptime is always consistent with the success/failure mix of the
    /// trailing window.
    #[test]
    fn uptime_matches_outcome_mix(outcomes in proptest::collection::vec(any::<bool>(), 1..60)) {
        let engine = Engine::new();
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let mut last = None;
        for (i, ok) in outcomes.iter().enumerate() {
            let res = if *ok {
                reading(i as f64, 0.0)
            } else {
                ScrapeResult::failed("prop-source", SourceType::Otelcol, "down")
            };
            last = Some(engine.process(&res, t0 + chrono::Duration::minutes(i as i64)));
        }

        let window: Vec<bool> = outcomes.iter().rev().take(20).rev().copied().collect();
        let expected = window.iter().filter(|b| **b).count() as f64 / window.len() as f64 * 100.0;
        prop_assert!((last.unwrap().uptime_pct - expected).abs() < 1e-9);
    }

    /// `put` is last-write-wins per id: the store never grows beyond the
    /// number of distinct ids and always returns the latest score.
    #[test]
    fn store_put_is_last_write_wins(scores in proptest::collection::vec(0.0f64..100.0, 1..40)) {
        let store = Store::new(Duration::from_secs(3600));
        for score in &scores {
            store.put(PipelineSnapshot {
                source_id: "only".into(),
                strength_score: *score,
                ..PipelineSnapshot::default()
            });
        }
        prop_assert_eq!(store.count(), 1);
        let entry = store.get("only").unwrap();
        prop_assert_eq!(entry.snapshot.strength_score, *scores.last().unwrap());
    }
}
