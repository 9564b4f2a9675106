//! Analyzers turn one frame of detections into alert candidates.
//!
//! Every analyzer owns its per-session state (dwell clocks, crowd history,
//! frame counters) and is driven by exactly one session task.

pub mod condition;
pub mod crowding;
pub mod loitering;

use alert_service::{AlertDraft, AlertKey};
use chrono::{DateTime, Utc};
use common::detections::FrameDetections;
use common::zones::{ConfigError, ZoneCatalog};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use condition::{ConditionAnalyzer, ConditionOptions, ConditionRule};
pub use crowding::{CrowdingAnalyzer, CrowdingOptions};
pub use loitering::{LoiteringAnalyzer, LoiteringOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Loitering,
    Crowding,
    GenderPresence,
    Drowsiness,
    Violence,
}

impl AnalyzerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Loitering => "loitering",
            AnalyzerKind::Crowding => "crowding",
            AnalyzerKind::GenderPresence => "gender_presence",
            AnalyzerKind::Drowsiness => "drowsiness",
            AnalyzerKind::Violence => "violence",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalyzerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loitering" => Ok(AnalyzerKind::Loitering),
            "crowding" => Ok(AnalyzerKind::Crowding),
            "gender_presence" => Ok(AnalyzerKind::GenderPresence),
            "drowsiness" => Ok(AnalyzerKind::Drowsiness),
            "violence" => Ok(AnalyzerKind::Violence),
            _ => Err(format!("Unknown analyzer: {}", s)),
        }
    }
}

/// A request to raise (or refresh) one alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub key: AlertKey,
    pub draft: AlertDraft,
    /// Dispatch a notification if this raise activates a new alert
    pub notify: bool,
}

/// Stop request produced by the crowd surge safeguard
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendHalt {
    pub subject_slope: f64,
    pub object_slope: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub candidates: Vec<AlertCandidate>,
    pub halt: Option<TrendHalt>,
}

impl FrameOutcome {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.halt.is_none()
    }
}

pub trait Analyzer: Send {
    fn kind(&self) -> AnalyzerKind;

    fn process_frame(&mut self, frame: &FrameDetections) -> FrameOutcome;
}

/// Build a configured analyzer. `options` may be `null` for defaults.
pub fn build_analyzer(
    kind: AnalyzerKind,
    options: serde_json::Value,
    zones: &ZoneCatalog,
) -> Result<Box<dyn Analyzer>, ConfigError> {
    let analyzer: Box<dyn Analyzer> = match kind {
        AnalyzerKind::Loitering => {
            Box::new(LoiteringAnalyzer::new(parse_options(options)?, zones.clone())?)
        }
        AnalyzerKind::Crowding => Box::new(CrowdingAnalyzer::new(parse_options(options)?)?),
        AnalyzerKind::GenderPresence | AnalyzerKind::Drowsiness | AnalyzerKind::Violence => {
            Box::new(ConditionAnalyzer::new(kind, parse_options(options)?)?)
        }
    };

    tracing::debug!(analyzer = %kind, "analyzer configured");
    Ok(analyzer)
}

fn parse_options<T: DeserializeOwned>(options: serde_json::Value) -> Result<T, ConfigError> {
    let options = if options.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        options
    };
    serde_json::from_value(options).map_err(|e| ConfigError::InvalidOptions(e.to_string()))
}

/// Seconds from an options struct as a duration, rejecting negative and
/// non-finite values
pub(crate) fn secs_to_duration(field: &str, secs: f64) -> Result<chrono::Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidOptions(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, secs
        )));
    }
    chrono::Duration::try_milliseconds((secs * 1000.0).round() as i64).ok_or_else(|| {
        ConfigError::InvalidOptions(format!("{} is out of range, got {}", field, secs))
    })
}
