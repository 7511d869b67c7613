//! ObsidianStack — observability-pipeline health monitoring.
//!
//! A fleet of agents scrapes the internal telemetry endpoints of pipeline
//! components (OTel Collector, Prometheus, Loki, Fluent Bit), derives health
//! signals from counter deltas, and ships snapshots over gRPC to a central
//! server. The server keeps the latest snapshot per source in a TTL store,
//! evaluates alert rules on every receive, and fans the current state out to
//! dashboards over REST and WebSocket.
//!
//! ## Crate layout
//!
//! Agent side: [`scraper`] → [`compute`] → [`shipper`], plus [`security`]
//! for TLS certificate checks on HTTPS sources.
//!
//! Server side: [`receiver`] → [`store`] → ([`alerts`], [`ws`], [`api`]),
//! with [`auth`] enforcing API-key authentication at the gRPC boundary.

pub mod alerts;
pub mod api;
pub mod auth;
pub mod compute;
pub mod config;
pub mod receiver;
pub mod scraper;
pub mod security;
pub mod shipper;
pub mod store;
pub mod ws;

/// Generated gRPC types for the `obsidian.v1` wire contract.
pub mod proto {
    tonic::include_proto!("obsidian.v1");
}
