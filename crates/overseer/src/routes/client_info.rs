//! Cluster configuration long-poll.

use axum::{Json, extract::State};

use tessera_common::{ClusterConfigBlob, OpenDatabaseRequest};

use crate::state::AppState;

/// Hold the request until the client's known config id is stale.
///
/// If the client disconnects axum drops this future, which deregisters the
/// client and leaves the distributor untouched.
pub async fn open_database(
    State(state): State<AppState>,
    Json(request): Json<OpenDatabaseRequest>,
) -> Json<ClusterConfigBlob> {
    let blob = state.distributor.open_database(&request).await;
    tracing::debug!(
        known = %request.known_client_info_id,
        current = %blob.id,
        "Answered open-database"
    );
    Json(ClusterConfigBlob::clone(&blob))
}
