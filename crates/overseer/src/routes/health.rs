//! Liveness endpoints.

use axum::Json;
use serde::Serialize;

use tessera_common::Ack;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Protocol-level ping; reaching the handler means the gate admitted the caller
pub async fn ping() -> Json<Ack> {
    Json(Ack::OK)
}
