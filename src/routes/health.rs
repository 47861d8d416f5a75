use crate::{health::OverallHealthResponse, server::Server};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};

/// Aggregated health of the database, cache and token signing
pub fn create_health_routes() -> Router<Server> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(server): State<Server>) -> (StatusCode, Json<OverallHealthResponse>) {
    let response = server.health_service.check_health().await;
    let status = match response.status {
        crate::health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(response))
}
