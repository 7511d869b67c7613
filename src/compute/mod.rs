//! The compute engine turns raw scrape counter readings into derived
//! per-minute rates, a composite strength score and a health state.

pub mod engine;
pub mod score;

pub use engine::{Engine, SignalStats, Snapshot};
pub use score::HealthState;
