//! obsidianstack-server — receives snapshots over gRPC, keeps them in a TTL
//! store, evaluates alert rules and serves dashboards over REST and
//! WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use obsidianstack::alerts;
use obsidianstack::api::{self, ApiState};
use obsidianstack::auth;
use obsidianstack::config;
use obsidianstack::proto::snapshot_service_server::SnapshotServiceServer;
use obsidianstack::receiver::Receiver;
use obsidianstack::store::Store;
use obsidianstack::ws::Hub;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Broadcast cadence of the WebSocket hub.
const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("obsidianstack", LevelFilter::DEBUG),
        ("server", LevelFilter::DEBUG),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let cfg = config::load(&args.config)?;
    info!(
        "obsidianstack-server starting: grpc_port={} http_port={} snapshot_ttl={:?}",
        cfg.server.grpc_port, cfg.server.http_port, cfg.server.snapshot.ttl
    );

    let token = CancellationToken::new();

    // Snapshot store with background TTL eviction.
    let store = Arc::new(Store::new(cfg.server.snapshot.ttl));
    {
        let store = store.clone();
        let token = token.clone();
        tokio::spawn(async move { store.run(token).await });
    }

    // Alert engine — evaluated on every incoming snapshot.
    let alert_engine = Arc::new(alerts::Engine::new(cfg.server.alerts.clone()));

    // WebSocket hub — broadcasts the current snapshot on a fixed cadence.
    let hub = Arc::new(Hub::new(store.clone(), BROADCAST_INTERVAL));
    {
        let hub = hub.clone();
        let token = token.clone();
        tokio::spawn(async move { hub.run(token).await });
    }

    // gRPC receiver with the API-key interceptor in front of it. Binding
    // happens here so a taken port fails startup, not a background task.
    let grpc_addr: SocketAddr = ([0, 0, 0, 0], cfg.server.grpc_port).into();
    let grpc_listener = tokio::net::TcpListener::bind(grpc_addr)
        .await
        .with_context(|| format!("bind gRPC port {grpc_addr}"))?;
    let incoming = TcpIncoming::from_listener(grpc_listener, true, None)
        .map_err(|e| anyhow::anyhow!("grpc listener: {e}"))?;

    let interceptor = auth::api_key_interceptor(
        cfg.server.auth.mode,
        cfg.server.auth.effective_header().to_string(),
        cfg.server.auth.key(),
    );
    let receiver = Receiver::new(store.clone(), alert_engine.clone());

    let grpc_task = {
        let token = token.clone();
        tokio::spawn(async move {
            info!("gRPC receiver listening: addr={grpc_addr}");
            let result = tonic::transport::Server::builder()
                .add_service(SnapshotServiceServer::with_interceptor(
                    receiver,
                    interceptor,
                ))
                .serve_with_incoming_shutdown(incoming, token.cancelled_owned())
                .await;
            if let Err(err) = result {
                error!("gRPC server stopped: {err}");
            }
        })
    };

    // REST API + WebSocket hub on the HTTP port.
    let http_addr: SocketAddr = ([0, 0, 0, 0], cfg.server.http_port).into();
    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("bind HTTP port {http_addr}"))?;

    let app = api::router(ApiState {
        store: store.clone(),
        alerts: alert_engine.clone(),
        hub: hub.clone(),
    });

    let http_task = {
        let token = token.clone();
        tokio::spawn(async move {
            info!("HTTP server listening: addr={http_addr}");
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(err) = result {
                error!("HTTP server stopped: {err}");
            }
        })
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping"),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    token.cancel();
    let _ = grpc_task.await;
    let _ = http_task.await;

    info!("obsidianstack-server shutting down");
    Ok(())
}
