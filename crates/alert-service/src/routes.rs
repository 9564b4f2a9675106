use crate::registry::AlertRegistry;
use crate::types::AlertBatch;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

#[derive(Clone)]
pub struct AppState {
    pub registry: AlertRegistry,
}

/// Polling routes. Every successful poll consumes the batch it returns.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/alerts", get(drain_alerts))
        .route("/get_alerts", get(drain_alerts))
        .with_state(state)
}

async fn drain_alerts(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.drain_batch() {
        Ok(batch) => {
            tracing::debug!(alerts = batch.len(), "alerts drained by poll");
            Json(batch)
        }
        Err(e) => {
            // Clients only ever see an empty batch
            tracing::error!(error = %e, "failed to drain alert registry");
            Json(AlertBatch::new())
        }
    }
}
