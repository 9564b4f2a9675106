//! The per-session frame loop: source -> analyzer -> registry -> dispatcher.

use crate::analyzer::{Analyzer, AnalyzerKind, TrendHalt};
use crate::source::{DetectionSource, SourceError};
use alert_service::notifier::notification_message;
use alert_service::{dispatch_detached, AlertRegistry, NotificationDispatcher, RaiseOutcome, RegistryError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telemetry::metrics::{ANALYZER_FRAMES_PROCESSED, ANALYZER_TREND_HALTS};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared collaborators handed to every session
#[derive(Clone)]
pub struct SessionContext {
    pub registry: AlertRegistry,
    pub dispatcher: Option<Arc<dyn NotificationDispatcher>>,
    pub alert_ttl: Duration,
}

impl SessionContext {
    pub fn new(registry: AlertRegistry, alert_ttl: Duration) -> Self {
        Self {
            registry,
            dispatcher: None,
            alert_ttl,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    StreamEnded,
    Cancelled,
    TrendHalted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub alerts_created: u64,
    pub alerts_refreshed: u64,
    pub alerts_expired: u64,
    pub notifications_dispatched: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub analyzer: AnalyzerKind,
    pub end: SessionEnd,
    pub stats: SessionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<TrendHalt>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("alert registry failure: {0}")]
    Registry(#[from] RegistryError),

    #[error("detection source failure: {0}")]
    Source(#[from] SourceError),
}

/// Drive `analyzer` over `source` until the stream ends, `cancel` fires or
/// the analyzer requests a halt. Each frame's alerts are raised at the frame
/// timestamp, then stale alerts are expired against the same instant, so a
/// record refreshed on this frame is never expired by it.
///
/// A trend halt also cancels `cancel` so that anything else watching the
/// session sees it stop.
pub async fn run_session<S>(
    source: &mut S,
    analyzer: &mut dyn Analyzer,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> Result<SessionSummary, SessionError>
where
    S: DetectionSource + ?Sized,
{
    let kind = analyzer.kind();
    let mut stats = SessionStats::default();
    let mut halt = None;

    info!(analyzer = %kind, ttl_secs = ctx.alert_ttl.num_seconds(), "session started");

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            next = source.next_frame() => next,
        };

        let frame = match next {
            Ok(frame) => frame,
            Err(SourceError::StreamEnd) => break SessionEnd::StreamEnded,
            Err(SourceError::Malformed { line, source }) => {
                warn!(line, error = %source, "skipping malformed frame");
                stats.frames_skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = analyzer.process_frame(&frame);
        stats.frames_processed += 1;
        ANALYZER_FRAMES_PROCESSED
            .with_label_values(&[kind.as_str()])
            .inc();

        let now = frame.timestamp;
        for candidate in outcome.candidates {
            let notify = candidate.notify;
            match ctx.registry.raise_at(candidate.key, candidate.draft, now)? {
                RaiseOutcome::Created(record) => {
                    stats.alerts_created += 1;
                    if let (true, Some(dispatcher)) = (notify, &ctx.dispatcher) {
                        dispatch_detached(dispatcher.clone(), notification_message(&record));
                        stats.notifications_dispatched += 1;
                    }
                }
                RaiseOutcome::Refreshed(_) => stats.alerts_refreshed += 1,
            }
        }

        let expired = ctx.registry.expire_stale_at(ctx.alert_ttl, now)?;
        if !expired.is_empty() {
            debug!(count = expired.len(), "alerts expired during session");
            stats.alerts_expired += expired.len() as u64;
        }

        if let Some(trend_halt) = outcome.halt {
            ANALYZER_TREND_HALTS.inc();
            warn!(
                analyzer = %kind,
                subject_slope = trend_halt.subject_slope,
                object_slope = trend_halt.object_slope,
                "crowd surge detected, halting session"
            );
            halt = Some(trend_halt);
            cancel.cancel();
            break SessionEnd::TrendHalted;
        }
    };

    info!(
        analyzer = %kind,
        end = ?end,
        frames = stats.frames_processed,
        alerts_created = stats.alerts_created,
        "session finished"
    );

    Ok(SessionSummary {
        analyzer: kind,
        end,
        stats,
        halt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{build_analyzer, ConditionAnalyzer, ConditionOptions};
    use crate::source::VecSource;
    use alert_service::TransportError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use common::detections::{BoundingBox, Detection, FrameDetections};
    use common::zones::ZoneCatalog;
    use std::sync::Mutex;

    struct Recording {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationDispatcher for Recording {
        async fn notify(&self, message: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn violent_frame(secs: i64) -> FrameDetections {
        FrameDetections::new(at(secs), 224, 224).with_detections(vec![Detection::new(
            1,
            0.95,
            BoundingBox::new(0.0, 0.0, 224.0, 224.0),
        )])
    }

    fn calm_frame(secs: i64) -> FrameDetections {
        FrameDetections::new(at(secs), 224, 224)
    }

    fn violence_analyzer() -> ConditionAnalyzer {
        ConditionAnalyzer::new(AnalyzerKind::Violence, ConditionOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_repeat_trigger_refreshes_and_notifies_once() {
        let recording = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
        });
        let registry = AlertRegistry::new();
        let ctx = SessionContext::new(registry.clone(), Duration::seconds(60))
            .with_dispatcher(recording.clone());

        let mut source = VecSource::new((0..5).map(violent_frame));
        let mut analyzer = violence_analyzer();
        let summary = run_session(&mut source, &mut analyzer, &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.end, SessionEnd::StreamEnded);
        assert_eq!(summary.stats.frames_processed, 5);
        assert_eq!(summary.stats.alerts_created, 1);
        assert_eq!(summary.stats.alerts_refreshed, 4);
        assert_eq!(summary.stats.notifications_dispatched, 1);

        let snapshot = registry.snapshot().unwrap();
        let record = snapshot.values().next().unwrap();
        assert_eq!(record.created_at, at(0));
        assert_eq!(record.last_seen, at(4));

        // Let the detached dispatch run
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if !recording.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            recording.sent.lock().unwrap().as_slice(),
            ["Alert! Violent activity detected in Lobby."]
        );
    }

    #[tokio::test]
    async fn test_alert_expires_after_ttl_of_silence() {
        let registry = AlertRegistry::new();
        let ctx = SessionContext::new(registry.clone(), Duration::seconds(60));

        let mut source = VecSource::new(vec![violent_frame(0), calm_frame(60), calm_frame(61)]);
        let mut analyzer = violence_analyzer();
        let summary = run_session(&mut source, &mut analyzer, &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.stats.alerts_expired, 1);
        assert!(registry.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let ctx = SessionContext::new(AlertRegistry::new(), Duration::seconds(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut source = VecSource::new((0..3).map(violent_frame));
        let mut analyzer = violence_analyzer();
        let summary = run_session(&mut source, &mut analyzer, &ctx, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.end, SessionEnd::Cancelled);
        assert_eq!(summary.stats.frames_processed, 0);
        assert_eq!(source.remaining(), 3);
    }

    #[tokio::test]
    async fn test_crowd_surge_halts_and_cancels() {
        let registry = AlertRegistry::new();
        let ctx = SessionContext::new(registry.clone(), Duration::seconds(60));
        let cancel = CancellationToken::new();

        let people = |n: usize| -> Vec<Detection> {
            (0..n)
                .map(|i| {
                    let x = i as f64 * 30.0;
                    Detection::new(0, 0.9, BoundingBox::new(x, 0.0, x + 20.0, 40.0))
                })
                .collect()
        };
        let frames = [(0, 5), (10, 8), (20, 12), (30, 16)]
            .into_iter()
            .map(|(secs, n)| FrameDetections::new(at(secs), 640, 480).with_detections(people(n)));

        let mut source = VecSource::new(frames);
        let mut analyzer =
            build_analyzer(AnalyzerKind::Crowding, serde_json::Value::Null, &ZoneCatalog::default())
                .unwrap();
        let summary = run_session(&mut source, analyzer.as_mut(), &ctx, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.end, SessionEnd::TrendHalted);
        assert!(summary.halt.is_some());
        assert!(cancel.is_cancelled());
        assert!(source.remaining() < 4);

        let batch = registry.drain_batch().unwrap();
        assert!(batch.contains_key("crowd_surge:Quadrangle"));
    }
}
