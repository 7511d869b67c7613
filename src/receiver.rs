//! The gRPC receiver — accepts snapshots from agents and feeds the store
//! and alert engine.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use crate::alerts;
use crate::proto::snapshot_service_server::SnapshotService;
use crate::proto::{PipelineSnapshot, SendResponse};
use crate::store::Store;

/// Implements `obsidian.v1.SnapshotService`. Authentication is enforced by
/// the interceptor before any method here runs.
pub struct Receiver {
    store: Arc<Store>,
    alerts: Arc<alerts::Engine>,
}

impl Receiver {
    pub fn new(store: Arc<Store>, alerts: Arc<alerts::Engine>) -> Self {
        Self { store, alerts }
    }
}

#[tonic::async_trait]
impl SnapshotService for Receiver {
    /// Unary handler called by agent instances. Unknown source ids are
    /// accepted — sources register implicitly by sending.
    async fn send_snapshot(
        &self,
        request: Request<PipelineSnapshot>,
    ) -> Result<Response<SendResponse>, Status> {
        let snap = request.into_inner();

        if snap.source_id.is_empty() {
            return Err(Status::invalid_argument("source_id is required"));
        }

        debug!(
            "receiver: snapshot stored: source_id={} source_type={} state={} score={}",
            snap.source_id, snap.source_type, snap.state, snap.strength_score
        );

        self.store.put(snap.clone());
        self.alerts.evaluate(&snap);

        Ok(Response::new(SendResponse {
            ok: true,
            message: String::new(),
        }))
    }
}
