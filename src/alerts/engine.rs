//! Rule evaluation and the per-(rule, source) firing/resolved state machine.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::alerts::{condition, webhook};
use crate::config::AlertsConfig;
use crate::proto::PipelineSnapshot;

/// Cooldown applied when a rule does not configure one (zero counts as
/// unconfigured; a negative duration is not a way to disable suppression).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Resolved alerts kept for the history view.
const MAX_HISTORY: usize = 200;

/// How long resolved alerts remain visible in [`Engine::active`].
const RECENT_WINDOW: Duration = Duration::from_secs(3600);

/// One alert event produced by the rule engine.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub rule_name: String,
    pub source_id: String,
    pub severity: String,
    pub message: String,
    pub value: f64,
    pub fired_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub state: AlertState,
}

/// Lifecycle state of one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Resolved,
}

/// Evaluates alert rules against incoming snapshots and delivers webhook
/// notifications on fire/resolve transitions.
///
/// Transitions for one `(rule, source)` key are serialized under the
/// engine's lock; webhook delivery runs on a detached task after the lock
/// is released so a slow endpoint never blocks the receiver.
pub struct Engine {
    cfg: AlertsConfig,
    client: reqwest::Client,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Currently firing alerts, keyed by "rule:source".
    active: HashMap<String, Alert>,
    /// Last fire time per key, for cooldown suppression.
    last_fire: HashMap<String, DateTime<Utc>>,
    /// Recently resolved alerts, newest last.
    history: VecDeque<Alert>,
}

impl Engine {
    /// An engine with no rules is valid; `evaluate` becomes a no-op.
    pub fn new(cfg: AlertsConfig) -> Self {
        Self {
            cfg,
            client: webhook::client(),
            state: Mutex::new(State::default()),
        }
    }

    /// Tests every configured rule against the snapshot. Newly firing rules
    /// are recorded and dispatched; firing rules whose condition went false
    /// are resolved, archived and dispatched.
    pub fn evaluate(&self, snap: &PipelineSnapshot) {
        if self.cfg.rules.is_empty() {
            return;
        }

        let now = Utc::now();
        for rule in &self.cfg.rules {
            let key = format!("{}:{}", rule.name, snap.source_id);
            let (fires, value) = condition::eval(&rule.condition, snap);

            let delivery = {
                let mut state = self.state.lock().unwrap();
                if fires {
                    self.fire(&mut state, rule, &key, snap, value, now)
                } else {
                    resolve(&mut state, &key, now)
                }
            };

            if let Some(alert) = delivery {
                match alert.state {
                    AlertState::Firing => warn!(
                        "alert fired: rule={} source={} value={value} severity={}",
                        rule.name, snap.source_id, alert.severity
                    ),
                    AlertState::Resolved => info!(
                        "alert resolved: rule={} source={}",
                        rule.name, snap.source_id
                    ),
                }
                self.dispatch(alert);
            }
        }
    }

    /// Point-in-time copy of currently firing alerts plus alerts resolved
    /// within the last hour, newest first.
    pub fn active(&self) -> Vec<Alert> {
        let state = self.state.lock().unwrap();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(RECENT_WINDOW).unwrap_or(chrono::Duration::zero());

        let mut out: Vec<Alert> = state.active.values().cloned().collect();
        out.extend(
            state
                .history
                .iter()
                .filter(|a| a.resolved_at.is_some_and(|t| t > cutoff))
                .cloned(),
        );
        out.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        out
    }

    /// Number of currently firing alerts.
    pub fn firing_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    fn fire(
        &self,
        state: &mut State,
        rule: &crate::config::AlertRule,
        key: &str,
        snap: &PipelineSnapshot,
        value: f64,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let cooldown = if rule.cooldown.is_zero() {
            DEFAULT_COOLDOWN
        } else {
            rule.cooldown
        };

        if let Some(last) = state.last_fire.get(key) {
            let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
            if elapsed <= cooldown {
                return None;
            }
        }

        let severity = rule
            .severity
            .map(|s| s.as_str())
            .unwrap_or("warning")
            .to_string();

        let alert = Alert {
            id: format!(
                "{}:{}:{}",
                rule.name,
                snap.source_id,
                now.timestamp_nanos_opt().unwrap_or_default()
            ),
            rule_name: rule.name.clone(),
            source_id: snap.source_id.clone(),
            message: format!(
                "[{severity}] {} fired on {} — {} = {value:.2}",
                rule.name, snap.source_id, rule.condition
            ),
            severity,
            value,
            fired_at: now,
            resolved_at: None,
            state: AlertState::Firing,
        };

        state.active.insert(key.to_string(), alert.clone());
        state.last_fire.insert(key.to_string(), now);
        Some(alert)
    }

    fn dispatch(&self, alert: Alert) {
        if self.cfg.webhooks.is_empty() {
            return;
        }
        let client = self.client.clone();
        let webhooks = self.cfg.webhooks.clone();
        tokio::spawn(async move {
            webhook::deliver(&client, &webhooks, &alert).await;
        });
    }
}

/// Takes a firing alert for `key` out of the active set, marks it resolved
/// and archives it. Not-firing without prior activation produces nothing.
fn resolve(state: &mut State, key: &str, now: DateTime<Utc>) -> Option<Alert> {
    let mut alert = state.active.remove(key)?;
    alert.state = AlertState::Resolved;
    alert.resolved_at = Some(now);

    if state.history.len() >= MAX_HISTORY {
        state.history.pop_front();
    }
    state.history.push_back(alert.clone());
    Some(alert)
}
