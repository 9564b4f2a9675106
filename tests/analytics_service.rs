use alert_service::AlertBatch;
use analytics_service::{api, EngineState, ServiceConfig};
use anyhow::Result;
use axum::http::StatusCode;
use axum_test::TestServer;
use common::zones::ZoneCatalog;
use serde_json::{json, Value};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn create_test_server() -> Result<TestServer> {
    let state = EngineState::new(ServiceConfig::default(), ZoneCatalog::default(), None);
    Ok(TestServer::new(api::router(state))?)
}

/// Drowsiness camera feed: eyes closed on every frame, a yawn on the first
fn drowsiness_feed(frames: usize) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for i in 0..frames {
        let yawn = if i == 0 {
            r#",{"class_id":1,"confidence":0.8,"bbox":[40,80,120,140]}"#
        } else {
            ""
        };
        writeln!(
            file,
            r#"{{"timestamp":"2025-04-02T22:00:{:02}.{:03}Z","width":640,"height":480,"detections":[{{"class_id":0,"confidence":0.92,"bbox":[30,20,200,160]}}{}]}}"#,
            i / 10,
            (i % 10) * 100,
            yawn
        )?;
    }
    Ok(file)
}

async fn wait_for_session(server: &TestServer) -> Result<Value> {
    for _ in 0..200 {
        let body: Value = server.get("/v1/sessions").await.json();
        if let Some(session) = body["sessions"].as_array().and_then(|s| s.last()) {
            if session["state"] != "running" {
                return Ok(session.clone());
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("session did not finish")
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let server = create_test_server()?;

    let response = server.get("/healthz").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");

    Ok(())
}

#[tokio::test]
async fn test_session_alerts_are_polled_once() -> Result<()> {
    let server = create_test_server()?;
    let feed = drowsiness_feed(40)?;

    let response = server
        .post("/v1/sessions")
        .json(&json!({
            "analyzer": "drowsiness",
            "source_path": feed.path().display().to_string(),
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let started: Value = response.json();
    assert_eq!(started["analyzer"], "drowsiness");

    let session = wait_for_session(&server).await?;
    assert_eq!(session["state"], "stream_ended");
    assert_eq!(session["stats"]["frames_processed"], 40);
    assert_eq!(session["id"], started["session_id"]);

    let batch: AlertBatch = server.get("/alerts").await.json();
    assert_eq!(batch.len(), 2);

    let drowsiness = &batch["drowsiness:Cabin"];
    assert_eq!(drowsiness.len(), 1);
    assert_eq!(drowsiness[0].title, "Drowsiness");
    assert_eq!(drowsiness[0].description, "Drowsiness detected");
    assert_eq!(drowsiness[0].location, "Cabin");
    assert_eq!(batch["yawn:Cabin"][0].title, "Yawn");

    let second: AlertBatch = server.get("/get_alerts").await.json();
    assert!(second.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_options_are_rejected() -> Result<()> {
    let server = create_test_server()?;
    let feed = drowsiness_feed(1)?;

    let response = server
        .post("/v1/sessions")
        .json(&json!({
            "analyzer": "loitering",
            "source_path": feed.path().display().to_string(),
            "options": { "restricted_zones": ["roof"] }
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap_or_default().contains("roof"));

    // Nothing was started
    let sessions: Value = server.get("/v1/sessions").await.json();
    assert_eq!(sessions["sessions"], json!([]));

    Ok(())
}
