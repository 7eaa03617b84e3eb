//! Calls passed through to the cluster controller.

use axum::{Json, extract::State};

use tessera_common::{Ack, ForceRecoveryRequest, WorkerIdentity};

use super::ApiError;
use crate::state::AppState;

pub async fn client_workers(State(state): State<AppState>) -> Json<Vec<WorkerIdentity>> {
    Json(state.controller.client_workers())
}

pub async fn force_recovery(
    State(state): State<AppState>,
    Json(request): Json<ForceRecoveryRequest>,
) -> Result<Json<Ack>, ApiError> {
    state.controller.force_recovery(&request.dc_id)?;
    Ok(Json(Ack::OK))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let document = state.controller.status(&state.status_inputs())?;
    Ok(Json(document))
}
