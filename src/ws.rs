//! WebSocket hub — fans the current pipeline snapshot out to dashboard
//! clients.
//!
//! Every tick the hub builds **one** serialized message and offers it to
//! each client's bounded outbox without blocking. A client whose outbox is
//! full is evicted on the spot: backpressure from one slow consumer must
//! not stall the broadcaster or the other clients. New clients get the
//! current snapshot immediately on connect so the UI has data before the
//! first tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::api::{build_snapshot, ApiState, SnapshotResponse};
use crate::store::Store;

/// Deadline for a single write to a client socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for any inbound frame before treating the connection
/// as dead. Extended by each pong (and any other frame) the client sends.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence; must be shorter than [`PONG_WAIT`].
const PING_PERIOD: Duration = Duration::from_millis(PONG_WAIT.as_millis() as u64 * 9 / 10);

/// Per-client outgoing buffer depth, in serialized messages.
const OUTBOX_SIZE: usize = 16;

/// JSON envelope sent to clients on every broadcast.
#[derive(Debug, Serialize)]
struct Envelope {
    event: &'static str,
    data: SnapshotResponse,
}

/// Manages WebSocket clients and broadcasts the current snapshot to all of
/// them on a fixed interval.
pub struct Hub {
    store: Arc<Store>,
    interval: Duration,
    clients: RwLock<HashMap<u64, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new(store: Arc<Store>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of currently connected clients.
    pub fn count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Broadcast ticker loop. On cancellation every outbox is closed, which
    /// lets each writer issue a clean close frame before returning.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.close_all();
                    return;
                }
                _ = ticker.tick() => self.broadcast(),
            }
        }
    }

    /// Builds one message and offers it to every client. Clients with a
    /// full outbox are unregistered immediately.
    pub fn broadcast(&self) {
        let payload = self.build_message();

        let targets: Vec<(u64, mpsc::Sender<Arc<str>>)> = {
            let clients = self.clients.read().unwrap();
            clients.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut evict = Vec::new();
        for (id, tx) in targets {
            if tx.try_send(payload.clone()).is_err() {
                evict.push(id);
            }
        }

        if !evict.is_empty() {
            let mut clients = self.clients.write().unwrap();
            for id in evict {
                if clients.remove(&id).is_some() {
                    debug!("ws: evicted slow client: id={id}");
                }
            }
        }
    }

    fn build_message(&self) -> Arc<str> {
        let envelope = Envelope {
            event: "snapshot",
            data: build_snapshot(&self.store),
        };
        let json = serde_json::to_string(&envelope).unwrap_or_else(|_| String::from("{}"));
        Arc::from(json)
    }

    fn register(&self) -> (u64, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOX_SIZE);

        // Push the current snapshot before the client becomes reachable by
        // broadcast; the outbox is empty so this cannot fail.
        let _ = tx.try_send(self.build_message());

        self.clients.write().unwrap().insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.clients.write().unwrap().remove(&id);
    }

    fn close_all(&self) {
        self.clients.write().unwrap().clear();
    }

    /// Serves one upgraded connection until it closes or errors.
    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        info!("ws: client connected");
        let (id, outbox) = self.register();

        let (sink, stream) = socket.split();
        let mut writer = tokio::spawn(write_pump(sink, outbox));
        let mut reader = tokio::spawn(read_pump(stream));

        // Either pump finishing tears down the client.
        tokio::select! {
            _ = &mut writer => reader.abort(),
            _ = &mut reader => writer.abort(),
        }

        self.unregister(id);
        info!("ws: client disconnected: id={id}");
    }
}

/// Drains the outbox into the socket and pings on a timer. Returns on any
/// write error, or after sending a close frame when the outbox closes.
async fn write_pump(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Arc<str>>,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            msg = outbox.recv() => {
                match msg {
                    Some(payload) => {
                        let frame = Message::Text(payload.to_string());
                        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(frame)).await {
                            Ok(Ok(())) => {}
                            _ => return,
                        }
                    }
                    None => {
                        // Outbox closed: hub shutdown or eviction.
                        let _ = tokio::time::timeout(
                            WRITE_TIMEOUT,
                            sink.send(Message::Close(None)),
                        )
                        .await;
                        return;
                    }
                }
            }

            _ = ping.tick() => {
                let frame = Message::Ping(Vec::new());
                match tokio::time::timeout(WRITE_TIMEOUT, sink.send(frame)).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

/// Consumes inbound frames for liveness only. Data payloads are discarded;
/// the read deadline is extended by every frame received. Returns on close,
/// error, or deadline expiry.
async fn read_pump(mut stream: futures::stream::SplitStream<WebSocket>) {
    loop {
        match tokio::time::timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return,
            Ok(Some(Ok(frame))) => {
                // Pongs and stray data frames both count as liveness.
                trace!("ws: inbound frame: {frame:?}");
            }
            Ok(Some(Err(_))) | Err(_) => return,
        }
    }
}

/// Upgrade handler for `GET /ws/stream`. A plain request without the
/// upgrade handshake is rejected by the extractor.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}
