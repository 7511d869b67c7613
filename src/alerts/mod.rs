//! Threshold-based alerting: a tiny condition language, a per-(rule, source)
//! firing/resolved state machine with cooldown, and fire-and-forget webhook
//! delivery.

pub mod condition;
pub mod engine;
pub mod webhook;

pub use engine::{Alert, AlertState, Engine};
