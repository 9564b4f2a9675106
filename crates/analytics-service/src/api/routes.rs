use super::error::ApiError;
use crate::state::{EngineState, SessionInfo, StartSessionRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

/// Start an analyzer session over a detection file
pub async fn start_session(
    State(state): State<EngineState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let analyzer = request.analyzer;
    let session_id = state.start_session(request).await.map_err(|e| {
        tracing::warn!(analyzer = %analyzer, error = %e, "session start rejected");
        ApiError::from(e)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "session_id": session_id,
            "analyzer": analyzer,
        })),
    ))
}

/// Status of the running session
pub async fn current_session(
    State(state): State<EngineState>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .current_session()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no analyzer session is running"))
}

/// Cancel the running session
pub async fn stop_session(State(state): State<EngineState>) -> Result<impl IntoResponse, ApiError> {
    let session_id = state
        .stop_session()
        .await
        .ok_or_else(|| ApiError::not_found("no analyzer session is running"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "session_id": session_id,
            "stopping": true,
        })),
    ))
}

/// All sessions started by this process, oldest first
pub async fn list_sessions(State(state): State<EngineState>) -> impl IntoResponse {
    let sessions = state.list_sessions().await;
    (StatusCode::OK, Json(json!({ "sessions": sessions })))
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "analytics-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<EngineState>) -> impl IntoResponse {
    match state.registry().len() {
        Ok(active_alerts) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "node_id": state.config().node_id,
                "zones": state.zones().len(),
                "session_running": state.is_busy(),
                "active_alerts": active_alerts,
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "alert registry unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not ready",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::config::ServiceConfig;
    use crate::state::EngineState;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use common::zones::ZoneCatalog;
    use serde_json::{json, Value};

    fn server() -> TestServer {
        let state = EngineState::new(ServiceConfig::default(), ZoneCatalog::default(), None);
        TestServer::new(router(state)).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = server().get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readyz_reports_idle() {
        let response = server().get("/readyz").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["session_running"], false);
        assert_eq!(body["active_alerts"], 0);
    }

    #[tokio::test]
    async fn test_current_session_when_idle_is_404() {
        let server = server();
        server
            .get("/v1/sessions/current")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete("/v1/sessions/current")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_with_missing_source_is_400() {
        let response = server()
            .post("/v1/sessions")
            .json(&json!({
                "analyzer": "violence",
                "source_path": "/nonexistent/frames.jsonl"
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_alert_poll_is_mounted() {
        let response = server().get("/get_alerts").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({}));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        telemetry::metrics::ALERTS_DRAINED.inc_by(0);
        server().get("/metrics").await.assert_status_ok();
    }
}
