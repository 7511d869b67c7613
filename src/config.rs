//! YAML configuration for the agent and server binaries.
//!
//! Secrets (API keys, bearer tokens, passwords, webhook URLs) are never
//! stored in the file. Fields named `*_env` hold the *name* of an
//! environment variable; the value is resolved at read-time via the
//! accessor methods ([`AuthConfig::key`], [`WebhookConfig::url`], ...).
//!
//! Durations accept either a plain number of seconds or a suffixed string
//! (`500ms`, `30s`, `15m`, `1h`).

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default values applied when fields are absent from the config file.
pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SHIP_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_GRPC_PORT: u16 = 50051;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(300);

/// Top-level configuration shared by both binaries. The agent reads the
/// `agent:` section, the server reads `server:`; each ignores the other.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Agent-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// gRPC address of the server (host:port).
    #[serde(default)]
    pub server_endpoint: String,

    /// How often each source is polled.
    #[serde(default = "default_scrape_interval", deserialize_with = "de_duration")]
    pub scrape_interval: Duration,

    /// Reserved — the shipper drains continuously in this design. Parsed and
    /// validated for config compatibility.
    #[serde(default = "default_ship_interval", deserialize_with = "de_duration")]
    pub ship_interval: Duration,

    /// Capacity of the shipper's drop-oldest ring buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Pipeline components to monitor.
    #[serde(default)]
    pub sources: Vec<Source>,

    /// How the agent authenticates to the server's gRPC receiver.
    #[serde(default)]
    pub server_auth: AuthConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: String::new(),
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            ship_interval: DEFAULT_SHIP_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            sources: Vec::new(),
            server_auth: AuthConfig::default(),
        }
    }
}

/// One monitored pipeline component.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// Unique, human-readable identifier.
    pub id: String,

    /// Component type.
    #[serde(rename = "type")]
    pub kind: SourceType,

    /// Full URL of the component's telemetry endpoint.
    pub endpoint: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// Supported pipeline component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Otelcol,
    Prometheus,
    Loki,
    Fluentbit,
    Http,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Otelcol => "otelcol",
            SourceType::Prometheus => "prometheus",
            SourceType::Loki => "loki",
            SourceType::Fluentbit => "fluentbit",
            SourceType::Http => "http",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication mode for a source endpoint or the outbound gRPC link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Apikey,
    Bearer,
    Mtls,
}

/// Authentication settings. Which fields are meaningful depends on `mode`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// Header name the API key is sent in (mode = apikey).
    #[serde(default)]
    pub header: String,

    /// Environment variable holding the API key value (mode = apikey).
    #[serde(default)]
    pub key_env: String,

    /// Environment variable holding the bearer token (mode = bearer).
    #[serde(default)]
    pub token_env: String,

    /// Literal username — safe to store in config (mode = basic).
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the basic-auth password (mode = basic).
    #[serde(default)]
    pub password_env: String,

    /// Client certificate material (mode = mtls).
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
    #[serde(default)]
    pub ca_file: String,
}

impl AuthConfig {
    /// API key resolved from the environment; empty when unconfigured.
    pub fn key(&self) -> String {
        resolve_env(&self.key_env)
    }

    /// Bearer token resolved from the environment.
    pub fn token(&self) -> String {
        resolve_env(&self.token_env)
    }

    /// Basic-auth password resolved from the environment.
    pub fn password(&self) -> String {
        resolve_env(&self.password_env)
    }
}

/// Per-source TLS dial options.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Disables certificate verification. Only for internal CAs in
    /// development environments.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Server-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port the gRPC receiver listens on.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Port the REST API and WebSocket hub listen on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Incoming gRPC client authentication.
    #[serde(default)]
    pub auth: ServerAuthConfig,

    /// In-memory snapshot retention.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Alert rules and webhook delivery targets.
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_port: DEFAULT_GRPC_PORT,
            http_port: DEFAULT_HTTP_PORT,
            auth: ServerAuthConfig::default(),
            snapshot: SnapshotConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

/// Incoming-connection authentication on the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerAuthConfig {
    /// One of: apikey | mtls | none.
    #[serde(default)]
    pub mode: AuthMode,

    /// gRPC metadata key the API key is read from. Defaults to "x-api-key".
    #[serde(default)]
    pub header: String,

    /// Environment variable holding the expected API key.
    #[serde(default)]
    pub key_env: String,
}

impl ServerAuthConfig {
    /// Expected API key resolved from the environment; empty when
    /// unconfigured. An empty key means "not configured" and the
    /// interceptor allows all calls, even in apikey mode.
    pub fn key(&self) -> String {
        resolve_env(&self.key_env)
    }

    /// Configured metadata key, or the default "x-api-key".
    pub fn effective_header(&self) -> &str {
        if self.header.is_empty() {
            "x-api-key"
        } else {
            &self.header
        }
    }
}

/// In-memory snapshot retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// How long a source's snapshot stays in the store after its last
    /// update. Entries older than this are evicted and excluded from lists.
    #[serde(default = "default_snapshot_ttl", deserialize_with = "de_duration")]
    pub ttl: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SNAPSHOT_TTL,
        }
    }
}

/// Alerting rules and webhook targets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// One threshold-based alert condition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertRule {
    /// Human-readable alert identifier; part of the deduplication key.
    pub name: String,

    /// A three-token expression: "drop_pct > 10", "state == critical",
    /// "cert_days_left < 14".
    pub condition: String,

    /// Defaults to warning when absent.
    #[serde(default)]
    pub severity: Option<Severity>,

    /// Suppresses re-fires for this duration after a fire. Zero (or absent)
    /// means "use the engine default" of 15 minutes.
    #[serde(default, deserialize_with = "de_duration")]
    pub cooldown: Duration,
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One webhook delivery target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    #[serde(rename = "type")]
    pub kind: WebhookKind,

    /// Environment variable holding the webhook URL.
    pub url_env: String,
}

/// Webhook payload dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    Slack,
    Teams,
    Pagerduty,
    Http,
}

impl std::fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WebhookKind::Slack => "slack",
            WebhookKind::Teams => "teams",
            WebhookKind::Pagerduty => "pagerduty",
            WebhookKind::Http => "http",
        };
        f.write_str(s)
    }
}

impl WebhookConfig {
    /// Webhook URL resolved from the environment; empty when unconfigured.
    pub fn url(&self) -> String {
        resolve_env(&self.url_env)
    }
}

fn resolve_env(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    std::env::var(name).unwrap_or_default()
}

/// Reads and parses the YAML config file at `path`, fills defaults and
/// validates structural constraints. Errors here terminate the process at
/// startup.
pub fn load(path: &str) -> anyhow::Result<Config> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("config: read {path:?}"))?;
    let cfg: Config = serde_yaml::from_str(&data).context("config: parse yaml")?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> anyhow::Result<()> {
    if cfg.agent.scrape_interval.is_zero() {
        bail!("agent.scrape_interval must be positive");
    }
    if cfg.agent.ship_interval.is_zero() {
        bail!("agent.ship_interval must be positive");
    }
    if cfg.agent.buffer_size == 0 {
        bail!("agent.buffer_size must be positive");
    }

    let mut seen = HashSet::new();
    for (i, src) in cfg.agent.sources.iter().enumerate() {
        if src.id.is_empty() {
            bail!("agent.sources[{i}]: id is required");
        }
        if src.endpoint.is_empty() {
            bail!("agent.sources[{i}] {:?}: endpoint is required", src.id);
        }
        if !seen.insert(src.id.as_str()) {
            bail!("agent.sources[{i}]: duplicate id {:?}", src.id);
        }
    }

    if cfg.server.grpc_port == 0 {
        bail!("server.grpc_port must not be 0");
    }
    if cfg.server.http_port == 0 {
        bail!("server.http_port must not be 0");
    }
    if cfg.server.snapshot.ttl.is_zero() {
        bail!("server.snapshot.ttl must be positive");
    }

    for (i, rule) in cfg.server.alerts.rules.iter().enumerate() {
        if rule.name.is_empty() {
            bail!("server.alerts.rules[{i}]: name is required");
        }
        if rule.condition.is_empty() {
            bail!(
                "server.alerts.rules[{i}] {:?}: condition is required",
                rule.name
            );
        }
    }

    Ok(())
}

/// Watches `path` for changes and calls `on_change` with each successfully
/// reloaded config. An invalid file logs an error and keeps the previous
/// config active. Returns when `token` is cancelled.
pub async fn watch(
    token: CancellationToken,
    path: String,
    on_change: impl Fn(Config) + Send + 'static,
) -> anyhow::Result<()> {
    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(16);
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(err) => error!("config: watcher error: {err}"),
        },
    )
    .context("config: create watcher")?;

    watcher
        .watch(path.as_ref(), RecursiveMode::NonRecursive)
        .with_context(|| format!("config: watch {path:?}"))?;

    info!("config: watching for changes: {path}");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),

            Some(event) = rx.recv() => {
                // Editors often save via rename (atomic replace), so accept
                // create events as well as plain writes.
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                match load(&path) {
                    Ok(cfg) => {
                        info!("config: reloaded: {path}");
                        on_change(cfg);
                        // Re-arm in case an atomic save replaced the inode.
                        let _ = watcher.watch(path.as_ref(), RecursiveMode::NonRecursive);
                    }
                    Err(err) => {
                        error!("config: reload failed, keeping previous config: {err:#}");
                    }
                }
            }
        }
    }
}

fn default_scrape_interval() -> Duration {
    DEFAULT_SCRAPE_INTERVAL
}

fn default_ship_interval() -> Duration {
    DEFAULT_SHIP_INTERVAL
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_grpc_port() -> u16 {
    DEFAULT_GRPC_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_snapshot_ttl() -> Duration {
    DEFAULT_SNAPSHOT_TTL
}

fn de_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Text(String),
    }

    match Repr::deserialize(de)? {
        Repr::Secs(s) => Ok(Duration::from_secs(s)),
        Repr::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

/// Parses `500ms`, `30s`, `15m`, `2h` or a bare number of seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("invalid duration unit {unit:?} in {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
agent:
  server_endpoint: "127.0.0.1:50051"
  scrape_interval: 15s
  buffer_size: 500
  sources:
    - id: otel-main
      type: otelcol
      endpoint: http://otel:8888/metrics
    - id: loki-main
      type: loki
      endpoint: https://loki:3100/metrics
      auth:
        mode: bearer
        token_env: LOKI_TOKEN
      tls:
        insecure_skip_verify: true
  server_auth:
    mode: apikey
    header: x-api-key
    key_env: OBSIDIAN_API_KEY
server:
  grpc_port: 50051
  http_port: 8080
  snapshot:
    ttl: 2m
  alerts:
    rules:
      - name: high-drop
        condition: "drop_pct > 10"
        severity: critical
        cooldown: 5m
      - name: weak
        condition: "strength_score < 60"
    webhooks:
      - type: slack
        url_env: SLACK_WEBHOOK_URL
"#;

    #[test]
    fn parses_example() {
        let cfg: Config = serde_yaml::from_str(EXAMPLE).unwrap();
        validate(&cfg).unwrap();

        assert_eq!(cfg.agent.server_endpoint, "127.0.0.1:50051");
        assert_eq!(cfg.agent.scrape_interval, Duration::from_secs(15));
        // Unset fields fall back to defaults.
        assert_eq!(cfg.agent.ship_interval, DEFAULT_SHIP_INTERVAL);
        assert_eq!(cfg.agent.buffer_size, 500);
        assert_eq!(cfg.agent.sources.len(), 2);
        assert_eq!(cfg.agent.sources[0].kind, SourceType::Otelcol);
        assert_eq!(cfg.agent.sources[1].auth.mode, AuthMode::Bearer);
        assert!(cfg.agent.sources[1].tls.insecure_skip_verify);

        assert_eq!(cfg.server.snapshot.ttl, Duration::from_secs(120));
        assert_eq!(cfg.server.alerts.rules[0].cooldown, Duration::from_secs(300));
        assert_eq!(cfg.server.alerts.rules[0].severity, Some(Severity::Critical));
        assert_eq!(cfg.server.alerts.rules[1].severity, None);
        assert_eq!(cfg.server.alerts.rules[1].cooldown, Duration::ZERO);
        assert_eq!(cfg.server.alerts.webhooks[0].kind, WebhookKind::Slack);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.server.grpc_port, DEFAULT_GRPC_PORT);
        assert_eq!(cfg.server.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(cfg.server.snapshot.ttl, DEFAULT_SNAPSHOT_TTL);
        assert_eq!(cfg.agent.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(cfg.agent.sources.is_empty());
    }

    #[test]
    fn rejects_duplicate_source_ids() {
        let yaml = r#"
agent:
  sources:
    - { id: a, type: loki, endpoint: "http://x/metrics" }
    - { id: a, type: loki, endpoint: "http://y/metrics" }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("duplicate id"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_source_type() {
        let yaml = r#"
agent:
  sources:
    - { id: a, type: jaeger, endpoint: "http://x" }
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn rejects_missing_endpoint() {
        let yaml = r#"
agent:
  sources:
    - { id: a, type: loki, endpoint: "" }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_ttl() {
        let yaml = "server:\n  snapshot:\n    ttl: 0\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn secrets_resolve_from_env() {
        std::env::set_var("TEST_OBSIDIAN_KEY", "s3cr3t");
        let auth = AuthConfig {
            mode: AuthMode::Apikey,
            key_env: "TEST_OBSIDIAN_KEY".into(),
            ..AuthConfig::default()
        };
        assert_eq!(auth.key(), "s3cr3t");

        let unset = AuthConfig::default();
        assert_eq!(unset.key(), "");
    }

    #[test]
    fn load_reads_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(EXAMPLE.as_bytes()).unwrap();
        let cfg = load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.agent.sources.len(), 2);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(load("/nonexistent/obsidian.yaml").is_err());
    }
}
