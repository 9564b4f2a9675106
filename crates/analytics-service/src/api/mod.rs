pub mod error;
pub mod routes;

use crate::state::EngineState;
use alert_service::AppState;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: EngineState) -> Router {
    let alerts = alert_service::create_router(AppState {
        registry: state.registry().clone(),
    });

    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Session endpoints
        .route("/v1/sessions", get(routes::list_sessions).post(routes::start_session))
        .route(
            "/v1/sessions/current",
            get(routes::current_session).delete(routes::stop_session),
        )
        .with_state(state)
        // Alert polling
        .merge(alerts)
        .layer(TraceLayer::new_for_http())
}
