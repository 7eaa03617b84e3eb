//! Operator endpoints: failure table inspection, membership removal and
//! publishing cluster configuration.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, put},
};
use serde::Serialize;

use tessera_common::{ConfigId, PeerIdentity};

use crate::client_info::ClientSummary;
use crate::failure::AggregatorSnapshot;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/peers", get(get_peers).delete(remove_peer))
        .route("/cluster-config", put(publish_cluster_config))
        .route("/clients", get(get_clients))
}

async fn get_peers(State(state): State<AppState>) -> Json<AggregatorSnapshot> {
    Json(state.aggregator.snapshot())
}

#[derive(Serialize)]
struct RemovePeerResponse {
    removed: bool,
    version: u64,
}

async fn remove_peer(
    State(state): State<AppState>,
    Json(peer): Json<PeerIdentity>,
) -> Json<RemovePeerResponse> {
    let removed = state.aggregator.remove_peer(&peer);
    if removed {
        tracing::info!(peer = %peer, "Peer removed by operator");
    }
    Json(RemovePeerResponse {
        removed,
        version: state.aggregator.version(),
    })
}

#[derive(Serialize)]
struct PublishResponse {
    id: ConfigId,
    digest: String,
    bytes: usize,
}

async fn publish_cluster_config(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<PublishResponse> {
    let blob = state.distributor.publish(body.to_vec());
    Json(PublishResponse {
        id: blob.id,
        digest: blob.digest.clone(),
        bytes: blob.payload.len(),
    })
}

async fn get_clients(State(state): State<AppState>) -> Json<ClientSummary> {
    Json(state.distributor.clients())
}
