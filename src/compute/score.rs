//! The composite strength score.
//!
//! ```text
//! score = (
//!     (1 - drop_pct/100)   * 0.40  +
//!     (1 - latency_ratio)  * 0.30  +   // latency_ratio = p95/baseline, capped at 1
//!     recovery_rate/100    * 0.20  +
//!     uptime_pct/100       * 0.10
//! ) * 100
//! ```

/// Weight constants for the strength score formula. They must sum to 1.0.
pub const WEIGHT_DROP: f64 = 0.40;
pub const WEIGHT_LATENCY: f64 = 0.30;
pub const WEIGHT_RECOVERY: f64 = 0.20;
pub const WEIGHT_UPTIME: f64 = 0.10;

/// Thresholds that map a score to a health state.
pub const THRESHOLD_HEALTHY: f64 = 85.0;
pub const THRESHOLD_DEGRADED: f64 = 60.0;

/// Health state of one pipeline source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Critical => "critical",
            HealthState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised values fed into the score formula. Percentage fields are in
/// the range 0–100.
#[derive(Debug, Clone, Copy, Default)]
pub struct Input {
    /// Percentage of pipeline items that were dropped. 0 = no drops.
    pub drop_pct: f64,

    /// Observed P95 export latency in milliseconds; 0 when unavailable.
    pub latency_p95_ms: f64,

    /// Expected / acceptable P95 latency. When zero, the latency factor
    /// defaults to 1.0 (full credit, no penalty).
    pub baseline_latency_ms: f64,

    /// Percentage of pipeline traffic that got through.
    pub recovery_rate: f64,

    /// Percentage of recent scrape cycles that returned valid data.
    pub uptime_pct: f64,
}

/// Result of the score calculation, including the per-dimension factors
/// (each 0–1) for UI breakdowns.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub score: f64,
    pub state: HealthState,
    pub drop_factor: f64,
    pub latency_factor: f64,
    pub recovery_factor: f64,
    pub uptime_factor: f64,
}

/// Calculates the pipeline strength score.
///
/// When uptime, drop and recovery are all zero there is no data at all and
/// the state is `unknown` rather than a perfect-looking zero.
pub fn compute(input: Input) -> Output {
    if input.uptime_pct == 0.0 && input.drop_pct == 0.0 && input.recovery_rate == 0.0 {
        return Output {
            score: 0.0,
            state: HealthState::Unknown,
            drop_factor: 0.0,
            latency_factor: 0.0,
            recovery_factor: 0.0,
            uptime_factor: 0.0,
        };
    }

    let drop_factor = 1.0 - clamp01(input.drop_pct / 100.0);

    let latency_factor = if input.baseline_latency_ms > 0.0 {
        1.0 - clamp01(input.latency_p95_ms / input.baseline_latency_ms)
    } else {
        1.0
    };

    let recovery_factor = clamp01(input.recovery_rate / 100.0);
    let uptime_factor = clamp01(input.uptime_pct / 100.0);

    let score = (drop_factor * WEIGHT_DROP
        + latency_factor * WEIGHT_LATENCY
        + recovery_factor * WEIGHT_RECOVERY
        + uptime_factor * WEIGHT_UPTIME)
        * 100.0;

    Output {
        score,
        state: state_from_score(score),
        drop_factor,
        latency_factor,
        recovery_factor,
        uptime_factor,
    }
}

/// Maps a numeric score to a health state.
pub fn state_from_score(score: f64) -> HealthState {
    if score >= THRESHOLD_HEALTHY {
        HealthState::Healthy
    } else if score >= THRESHOLD_DEGRADED {
        HealthState::Degraded
    } else {
        HealthState::Critical
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
