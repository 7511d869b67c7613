//! The shipper buffers derived snapshots and delivers them to the server
//! over gRPC.
//!
//! [`Shipper::enqueue`] never blocks and never fails: when the buffer is
//! full the **oldest** snapshot is evicted — during an outage the newest
//! signal is the useful one. [`Shipper::run`] owns the outbound connection,
//! drains the buffer in FIFO order and reconnects with truncated
//! exponential backoff until cancelled.

mod convert;

pub use convert::to_proto;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::{Code, Request};
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, AuthMode};
use crate::proto::snapshot_service_client::SnapshotServiceClient;
use crate::proto::PipelineSnapshot;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffers snapshots and ships them to the server.
pub struct Shipper {
    cfg: AgentConfig,
    capacity: usize,
    buf: Mutex<VecDeque<PipelineSnapshot>>,
    wakeup: Notify,
}

impl Shipper {
    pub fn new(cfg: AgentConfig) -> Self {
        let capacity = cfg.buffer_size.max(1);
        Self {
            cfg,
            capacity,
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            wakeup: Notify::new(),
        }
    }

    /// Enqueues a snapshot for delivery. Non-blocking; if the buffer is
    /// full the oldest entry is evicted to make room.
    pub fn enqueue(&self, snap: PipelineSnapshot) {
        {
            let mut buf = self.buf.lock().unwrap();
            if buf.len() >= self.capacity {
                if let Some(evicted) = buf.pop_front() {
                    warn!(
                        "shipper: buffer full, evicted oldest snapshot: source={} cap={}",
                        evicted.source_id, self.capacity
                    );
                }
            }
            buf.push_back(snap);
        }
        self.wakeup.notify_one();
    }

    /// Number of snapshots currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    /// Drains the buffer, sending snapshots to the server and reconnecting
    /// with backoff when the connection is lost. Returns when `token` is
    /// cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut backoff = Backoff::new();

        loop {
            if token.is_cancelled() {
                return;
            }

            let channel = match self.connect().await {
                Ok(channel) => channel,
                Err(err) => {
                    let wait = backoff.next();
                    error!(
                        "shipper: dial failed, will retry: endpoint={} err={err:#} retry_in={wait:?}",
                        self.cfg.server_endpoint
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(wait) => continue,
                    }
                }
            };

            info!("shipper: connected: endpoint={}", self.cfg.server_endpoint);
            backoff.reset();

            self.drain(&token, channel).await;

            if token.is_cancelled() {
                return;
            }

            let wait = backoff.next();
            warn!(
                "shipper: connection lost, will reconnect: endpoint={} retry_in={wait:?}",
                self.cfg.server_endpoint
            );
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Sends buffered snapshots over one connection until a transient
    /// failure breaks it or `token` is cancelled.
    async fn drain(&self, token: &CancellationToken, channel: Channel) {
        let mut client = SnapshotServiceClient::new(channel);

        loop {
            let snap = tokio::select! {
                _ = token.cancelled() => return,
                snap = self.dequeue() => snap,
            };

            let source_id = snap.source_id.clone();
            let mut request = Request::new(snap.clone());
            self.apply_auth(&mut request);

            let outcome =
                tokio::time::timeout(SEND_TIMEOUT, client.send_snapshot(request)).await;

            match outcome {
                Ok(Ok(resp)) => {
                    let resp = resp.into_inner();
                    if resp.ok {
                        debug!("shipper: snapshot delivered: source={source_id}");
                    } else {
                        warn!(
                            "shipper: server rejected snapshot: source={source_id} message={}",
                            resp.message
                        );
                    }
                }

                Ok(Err(status)) if is_permanent(status.code()) => {
                    // The error is the payload, not the link: drop the
                    // snapshot and keep draining on the same connection.
                    error!(
                        "shipper: permanent send error, discarding snapshot: source={source_id} status={status}"
                    );
                }

                Ok(Err(status)) => {
                    warn!(
                        "shipper: transient send failure: source={source_id} status={status}"
                    );
                    self.requeue_front(snap);
                    return;
                }

                Err(_elapsed) => {
                    warn!("shipper: send timed out: source={source_id}");
                    self.requeue_front(snap);
                    return;
                }
            }
        }
    }

    /// Puts a snapshot back at the head of the buffer if there is room.
    /// When full, losing it is acceptable — the next cycle carries newer
    /// data for the same source.
    fn requeue_front(&self, snap: PipelineSnapshot) {
        let mut buf = self.buf.lock().unwrap();
        if buf.len() < self.capacity {
            buf.push_front(snap);
        }
    }

    /// Waits until a snapshot is available and removes it from the buffer.
    async fn dequeue(&self) -> PipelineSnapshot {
        loop {
            let notified = self.wakeup.notified();
            if let Some(snap) = self.buf.lock().unwrap().pop_front() {
                return snap;
            }
            notified.await;
        }
    }

    fn apply_auth(&self, request: &mut Request<PipelineSnapshot>) {
        let auth = &self.cfg.server_auth;
        if auth.mode != AuthMode::Apikey || auth.key_env.is_empty() {
            return;
        }
        let header = if auth.header.is_empty() {
            "x-api-key"
        } else {
            auth.header.as_str()
        };
        let key = auth.key();
        use tonic::metadata::{MetadataKey, MetadataValue};
        match (
            MetadataKey::from_bytes(header.as_bytes()),
            MetadataValue::try_from(key.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                request.metadata_mut().insert(name, value);
            }
            _ => warn!("shipper: invalid api key header {header:?}, sending without auth"),
        }
    }

    /// Opens the gRPC channel with the configured transport credentials.
    async fn connect(&self) -> anyhow::Result<Channel> {
        let endpoint = &self.cfg.server_endpoint;
        let url = if endpoint.contains("://") {
            endpoint.clone()
        } else if self.cfg.server_auth.mode == AuthMode::Mtls {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        };

        let mut ep = Channel::from_shared(url)
            .context("shipper: invalid server endpoint")?
            .connect_timeout(CONNECT_TIMEOUT);

        if self.cfg.server_auth.mode == AuthMode::Mtls {
            let auth = &self.cfg.server_auth;
            let cert = tokio::fs::read(&auth.cert_file)
                .await
                .with_context(|| format!("shipper: read cert file {:?}", auth.cert_file))?;
            let key = tokio::fs::read(&auth.key_file)
                .await
                .with_context(|| format!("shipper: read key file {:?}", auth.key_file))?;

            let mut tls = ClientTlsConfig::new().identity(Identity::from_pem(cert, key));
            if !auth.ca_file.is_empty() {
                let ca = tokio::fs::read(&auth.ca_file)
                    .await
                    .with_context(|| format!("shipper: read ca file {:?}", auth.ca_file))?;
                tls = tls.ca_certificate(Certificate::from_pem(ca));
            }
            ep = ep.tls_config(tls).context("shipper: tls config")?;
        }

        ep.connect().await.context("shipper: connect")
    }
}

/// gRPC codes that mean the snapshot itself is bad and retrying it can
/// never succeed.
fn is_permanent(code: Code) -> bool {
    matches!(
        code,
        Code::InvalidArgument | Code::Unauthenticated | Code::PermissionDenied
    )
}

/// Truncated exponential backoff with ±25% uniform jitter.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }

    /// Returns the jittered current delay and advances the internal state.
    fn next(&mut self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(-0.25..=0.25);
        let wait = self.current.mul_f64((1.0 + jitter).max(0.0));

        self.current = self.current.mul_f64(BACKOFF_MULTIPLIER).min(BACKOFF_MAX);
        wait
    }

    fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}
