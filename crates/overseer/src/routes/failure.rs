//! Heartbeats over HTTP, for participants that cannot use the UDP endpoint.

use axum::{Json, extract::State};

use tessera_common::{FailureMonitoringReply, FailureMonitoringRequest};

use crate::state::AppState;

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<FailureMonitoringRequest>,
) -> Json<FailureMonitoringReply> {
    let reply = state.aggregator.report_and_query(&request);
    tracing::trace!(
        peer = %request.addresses,
        changes = reply.changes.len(),
        version = reply.failure_information_version,
        "Heartbeat answered"
    );
    Json(reply)
}
