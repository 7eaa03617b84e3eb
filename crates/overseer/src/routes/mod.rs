//! HTTP route handlers for Overseer.

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use tessera_common::{ProtocolVersion, TesseraError};

use crate::gate::require_protocol;
use crate::state::AppState;

mod admin;
mod client_info;
mod cluster;
mod failure;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let timeout = TimeoutLayer::new(Duration::from_secs(state.config.request_timeout_secs));

    // Client calls: everything but the long-poll is bounded by the request timeout
    let client_calls = Router::new()
        .route("/ping", get(health::ping))
        .route("/failure-monitoring", post(failure::heartbeat))
        .route("/client-workers", get(cluster::client_workers))
        .route("/force-recovery", post(cluster::force_recovery))
        .route("/status", get(cluster::status))
        .layer(timeout.clone())
        .route("/open-database", post(client_info::open_database))
        .route_layer(middleware::from_fn_with_state(state.gate, require_protocol));

    Router::new()
        // Health
        .route("/health", get(health::health_check))

        .merge(client_calls)

        // Operator endpoints
        .nest("/admin", admin::admin_routes().layer(timeout))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum_protocol_version: Option<ProtocolVersion>,
}

/// Error returned by handlers, rendered as a JSON body
#[derive(Debug)]
pub struct ApiError(pub TesseraError);

impl From<TesseraError> for ApiError {
    fn from(err: TesseraError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let minimum_protocol_version = match &self.0 {
            TesseraError::IncompatibleProtocol { minimum, .. } => Some(*minimum),
            _ => None,
        };

        let body = ErrorBody {
            error: self.0.to_string(),
            retryable: self.0.is_retryable(),
            minimum_protocol_version,
        };
        (status, Json(body)).into_response()
    }
}
