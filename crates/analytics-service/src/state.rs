use crate::analyzer::{build_analyzer, AnalyzerKind};
use crate::config::ServiceConfig;
use crate::gate::SessionGate;
use crate::session::{run_session, SessionContext, SessionEnd, SessionError, SessionStats, SessionSummary};
use crate::source::{JsonLinesSource, SourceError};
use alert_service::{AlertRegistry, NotificationDispatcher};
use chrono::{DateTime, Utc};
use common::zones::{ConfigError, ZoneCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::ANALYZER_ACTIVE_SESSIONS;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub analyzer: AnalyzerKind,
    pub source_path: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    StreamEnded,
    Cancelled,
    TrendHalted,
    Failed,
}

impl From<SessionEnd> for SessionState {
    fn from(end: SessionEnd) -> Self {
        match end {
            SessionEnd::StreamEnded => SessionState::StreamEnded,
            SessionEnd::Cancelled => SessionState::Cancelled,
            SessionEnd::TrendHalted => SessionState::TrendHalted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub analyzer: AnalyzerKind,
    pub source_path: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<SessionStats>,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("an analyzer session is already running")]
    Busy,

    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot open detection source: {0}")]
    Source(#[from] SourceError),
}

struct ActiveSession {
    id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct EngineState {
    inner: Arc<EngineStateInner>,
}

struct EngineStateInner {
    config: ServiceConfig,
    zones: ZoneCatalog,
    registry: AlertRegistry,
    gate: SessionGate,
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    sessions: RwLock<HashMap<String, SessionInfo>>,
    active: Mutex<Option<ActiveSession>>,
}

impl EngineState {
    pub fn new(
        config: ServiceConfig,
        zones: ZoneCatalog,
        dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineStateInner {
                config,
                zones,
                registry: AlertRegistry::new(),
                gate: SessionGate::new(),
                dispatcher,
                sessions: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn zones(&self) -> &ZoneCatalog {
        &self.inner.zones
    }

    pub fn registry(&self) -> &AlertRegistry {
        &self.inner.registry
    }

    pub fn is_busy(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Validate the request, open its source and spawn the session task.
    /// Rejected with [`StartError::Busy`] while another session holds the gate.
    pub async fn start_session(&self, request: StartSessionRequest) -> Result<String, StartError> {
        let permit = self.inner.gate.try_enter().ok_or(StartError::Busy)?;

        let mut analyzer = build_analyzer(request.analyzer, request.options, &self.inner.zones)?;
        let mut source = JsonLinesSource::open(&request.source_path).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(
                id.clone(),
                SessionInfo {
                    id: id.clone(),
                    analyzer: request.analyzer,
                    source_path: request.source_path.clone(),
                    state: SessionState::Running,
                    started_at: Utc::now(),
                    finished_at: None,
                    stats: None,
                    last_error: None,
                },
            );
        }

        let mut ctx = SessionContext::new(self.inner.registry.clone(), self.inner.config.alert_ttl);
        ctx.dispatcher = self.inner.dispatcher.clone();

        // Hold the slot lock across the spawn so `finish` cannot run before the
        // active session is recorded
        let mut active = self.inner.active.lock().await;

        let state = self.clone();
        let session_id = id.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            ANALYZER_ACTIVE_SESSIONS.inc();
            state
                .supervise(&session_id, async move {
                    run_session(&mut source, analyzer.as_mut(), &ctx, &token).await
                })
                .await;
            ANALYZER_ACTIVE_SESSIONS.dec();
            drop(permit);
        });

        *active = Some(ActiveSession {
            id: id.clone(),
            cancel,
            handle,
        });

        info!(
            session_id = %id,
            analyzer = %request.analyzer,
            source = %request.source_path,
            "analyzer session started"
        );

        Ok(id)
    }

    /// Run the session on its own task so a panic still reaches `finish`
    async fn supervise<F>(&self, id: &str, run: F)
    where
        F: Future<Output = Result<SessionSummary, SessionError>> + Send + 'static,
    {
        let result = match tokio::spawn(run).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("session task aborted: {}", e)),
        };
        self.finish(id, result).await;
    }

    async fn finish(&self, id: &str, result: Result<SessionSummary, String>) {
        {
            let mut sessions = self.inner.sessions.write().await;
            if let Some(info) = sessions.get_mut(id) {
                info.finished_at = Some(Utc::now());
                match result {
                    Ok(summary) => {
                        info.state = summary.end.into();
                        info.stats = Some(summary.stats);
                    }
                    Err(e) => {
                        error!(session_id = %id, error = %e, "analyzer session failed");
                        info.state = SessionState::Failed;
                        info.last_error = Some(e);
                    }
                }
            }
        }

        let mut active = self.inner.active.lock().await;
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    /// Cancel the running session. Returns its id, or `None` when idle.
    pub async fn stop_session(&self) -> Option<String> {
        let active = self.inner.active.lock().await;
        active.as_ref().map(|session| {
            info!(session_id = %session.id, "stopping analyzer session");
            session.cancel.cancel();
            session.id.clone()
        })
    }

    pub async fn current_session(&self) -> Option<SessionInfo> {
        let id = {
            let active = self.inner.active.lock().await;
            active.as_ref().map(|a| a.id.clone())?
        };
        self.get_session(&id).await
    }

    pub async fn get_session(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions.values().cloned().collect();
        list.sort_by_key(|s| s.started_at);
        list
    }

    pub async fn shutdown(&self) {
        info!("Shutting down analytics service...");

        let active = self.inner.active.lock().await.take();
        if let Some(session) = active {
            session.cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, session.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(session_id = %session.id, error = %e, "session task panicked"),
                Err(_) => warn!(session_id = %session.id, "session did not stop within grace period"),
            }
        }

        info!("Analytics service shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn state() -> EngineState {
        EngineState::new(ServiceConfig::default(), ZoneCatalog::default(), None)
    }

    fn violence_file(frames: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..frames {
            writeln!(
                file,
                r#"{{"timestamp":"2025-03-01T10:00:{:02}Z","width":224,"height":224,"detections":[{{"class_id":1,"confidence":0.9,"bbox":[0,0,224,224]}}]}}"#,
                i
            )
            .unwrap();
        }
        file
    }

    async fn wait_until_idle(state: &EngineState) {
        for _ in 0..100 {
            if !state.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session did not finish");
    }

    #[tokio::test]
    async fn test_session_runs_to_completion() {
        let state = state();
        let file = violence_file(3);

        let id = state
            .start_session(StartSessionRequest {
                analyzer: AnalyzerKind::Violence,
                source_path: file.path().display().to_string(),
                options: serde_json::Value::Null,
            })
            .await
            .unwrap();
        wait_until_idle(&state).await;

        let info = state.get_session(&id).await.unwrap();
        assert_eq!(info.state, SessionState::StreamEnded);
        assert_eq!(info.stats.unwrap().frames_processed, 3);
        assert!(state.current_session().await.is_none());
        assert_eq!(state.registry().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_options_release_the_gate() {
        let state = state();
        let file = violence_file(1);

        let result = state
            .start_session(StartSessionRequest {
                analyzer: AnalyzerKind::Crowding,
                source_path: file.path().display().to_string(),
                options: serde_json::json!({ "history_size": "lots" }),
            })
            .await;
        assert!(matches!(result, Err(StartError::Config(_))));
        assert!(!state.is_busy());

        let missing = state
            .start_session(StartSessionRequest {
                analyzer: AnalyzerKind::Violence,
                source_path: "/nonexistent/frames.jsonl".to_string(),
                options: serde_json::Value::Null,
            })
            .await;
        assert!(matches!(missing, Err(StartError::Source(_))));
        assert!(!state.is_busy());
    }

    async fn exploding_run() -> Result<SessionSummary, SessionError> {
        panic!("analyzer blew up")
    }

    #[tokio::test]
    async fn test_panicked_session_is_failed_and_cleared() {
        let state = state();
        let id = "panicky".to_string();
        state.inner.sessions.write().await.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                analyzer: AnalyzerKind::Violence,
                source_path: "memory".to_string(),
                state: SessionState::Running,
                started_at: Utc::now(),
                finished_at: None,
                stats: None,
                last_error: None,
            },
        );
        *state.inner.active.lock().await = Some(ActiveSession {
            id: id.clone(),
            cancel: CancellationToken::new(),
            handle: tokio::spawn(async {}),
        });

        state.supervise(&id, exploding_run()).await;

        let info = state.get_session(&id).await.unwrap();
        assert_eq!(info.state, SessionState::Failed);
        assert!(info.finished_at.is_some());
        assert!(info.last_error.unwrap().contains("aborted"));
        assert!(state.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_when_idle_returns_none() {
        assert!(state().stop_session().await.is_none());
    }
}
