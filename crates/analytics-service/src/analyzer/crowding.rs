use super::{secs_to_duration, AlertCandidate, Analyzer, AnalyzerKind, FrameOutcome, TrendHalt};
use crate::engine::crowding::{analyze_frame, CrowdingLevel, CrowdingThresholds};
use crate::engine::trend::{CrowdSample, Trend, TrendConfig, TrendDetector};
use alert_service::{AlertCategory, AlertDraft, AlertKey};
use common::detections::FrameDetections;
use common::zones::ConfigError;
use serde::{Deserialize, Serialize};
use telemetry::metrics::ANALYZER_CROWDING_LEVEL;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrowdingOptions {
    pub subject_class: u32,
    pub min_confidence: f32,
    pub thresholds: CrowdingThresholds,
    pub location: String,
    pub history_size: usize,
    pub plateau_window_secs: f64,
    pub linear_window_secs: f64,
    pub plateau_tolerance: usize,
    pub linear_slope_threshold: f64,
    /// Notify on overcrowding activations; surges always notify
    pub notify: bool,
    /// Stop the session when a crowd surge is detected
    pub halt_on_surge: bool,
}

impl Default for CrowdingOptions {
    fn default() -> Self {
        Self {
            subject_class: 0,
            min_confidence: 0.5,
            thresholds: CrowdingThresholds::default(),
            location: "Quadrangle".to_string(),
            history_size: 300,
            plateau_window_secs: 30.0,
            linear_window_secs: 30.0,
            plateau_tolerance: 1,
            linear_slope_threshold: 0.1,
            notify: false,
            halt_on_surge: true,
        }
    }
}

pub struct CrowdingAnalyzer {
    options: CrowdingOptions,
    trend: TrendDetector,
}

impl CrowdingAnalyzer {
    pub fn new(options: CrowdingOptions) -> Result<Self, ConfigError> {
        if options.history_size < 2 {
            return Err(ConfigError::InvalidOptions(
                "history_size must hold at least two samples".to_string(),
            ));
        }
        if !options.linear_slope_threshold.is_finite() {
            return Err(ConfigError::InvalidOptions(
                "linear_slope_threshold must be finite".to_string(),
            ));
        }

        let trend = TrendDetector::new(TrendConfig {
            history_size: options.history_size,
            plateau_window: secs_to_duration("plateau_window_secs", options.plateau_window_secs)?,
            linear_window: secs_to_duration("linear_window_secs", options.linear_window_secs)?,
            plateau_tolerance: options.plateau_tolerance,
            linear_slope_threshold: options.linear_slope_threshold,
        });

        Ok(Self { options, trend })
    }

    fn level_candidate(&self, level: CrowdingLevel, subjects: usize) -> Option<AlertCandidate> {
        let location = &self.options.location;
        let (category, title, description) = match level {
            CrowdingLevel::Normal => return None,
            CrowdingLevel::Crowded => (
                AlertCategory::Overcrowding,
                "Overcrowding",
                format!("Overcrowding detected with {} people", subjects),
            ),
            CrowdingLevel::ModeratelyCrowded => (
                AlertCategory::ModerateCrowding,
                "Moderate Crowding",
                format!("Moderate crowding detected with {} people", subjects),
            ),
        };

        Some(AlertCandidate {
            key: AlertKey::for_location(category, location),
            draft: AlertDraft::new(title, description, location, category.default_severity()),
            notify: self.options.notify && level == CrowdingLevel::Crowded,
        })
    }
}

impl Analyzer for CrowdingAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Crowding
    }

    fn process_frame(&mut self, frame: &FrameDetections) -> FrameOutcome {
        let report = analyze_frame(
            &frame.detections,
            self.options.subject_class,
            self.options.min_confidence,
            &self.options.thresholds,
        );
        ANALYZER_CROWDING_LEVEL
            .with_label_values(&[report.level.as_str()])
            .inc();
        debug!(
            subjects = report.subject_count,
            objects = report.object_count,
            mean_overlap = report.mean_overlap,
            level = %report.level,
            "frame classified"
        );

        let mut outcome = FrameOutcome::default();
        outcome
            .candidates
            .extend(self.level_candidate(report.level, report.subject_count));

        let trend = self.trend.record(CrowdSample {
            timestamp: frame.timestamp,
            subject_count: report.subject_count,
            object_count: report.object_count,
            mean_overlap: report.mean_overlap,
        });

        match trend {
            Trend::Plateau {
                subject_range,
                object_range,
            } => {
                debug!(subject_range, object_range, "crowd counts have plateaued");
            }
            Trend::LinearIncrease {
                subject_slope,
                object_slope,
            } => {
                warn!(subject_slope, object_slope, "crowd counts rising linearly");
                let location = &self.options.location;
                outcome.candidates.push(AlertCandidate {
                    key: AlertKey::for_location(AlertCategory::CrowdSurge, location),
                    draft: AlertDraft::new(
                        "Crowd Surge",
                        format!(
                            "Crowd surge in {}: people count rising at {:.2} per second",
                            location, subject_slope
                        ),
                        location,
                        AlertCategory::CrowdSurge.default_severity(),
                    ),
                    notify: true,
                });

                if self.options.halt_on_surge {
                    info!("crowd surge safeguard requesting session halt");
                    outcome.halt = Some(TrendHalt {
                        subject_slope,
                        object_slope,
                        at: frame.timestamp,
                    });
                }
            }
            Trend::Insufficient | Trend::Steady => {}
        }

        outcome
    }
}
