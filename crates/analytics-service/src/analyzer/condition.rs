//! Condition analyzers: a class-presence rule that must hold for N
//! consecutive frames before it fires.

use super::{AlertCandidate, Analyzer, AnalyzerKind, FrameOutcome};
use alert_service::{AlertCategory, AlertDraft, AlertKey, Severity};
use common::detections::FrameDetections;
use common::zones::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_min_confidence() -> f32 {
    0.5
}

fn default_consecutive_frames() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionRule {
    pub category: AlertCategory,
    pub trigger_class: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_consecutive_frames")]
    pub consecutive_frames: u32,
    pub title: String,
    /// `{location}` is replaced with the rule location
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub notify: bool,
    /// Overrides the category's default severity
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl ConditionRule {
    fn preset(
        category: AlertCategory,
        trigger_class: u32,
        consecutive_frames: u32,
        title: &str,
        description: &str,
        location: &str,
    ) -> Self {
        Self {
            category,
            trigger_class,
            min_confidence: default_min_confidence(),
            consecutive_frames,
            title: title.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            notify: false,
            severity: None,
        }
    }

    /// Built-in rules for each condition analyzer
    pub fn presets(kind: AnalyzerKind) -> Vec<ConditionRule> {
        match kind {
            AnalyzerKind::GenderPresence => vec![ConditionRule::preset(
                AlertCategory::GenderPresence,
                1,
                1,
                "Gender Presence",
                "Female detected in {location}",
                "Boys Hostel",
            )],
            AnalyzerKind::Drowsiness => vec![
                ConditionRule::preset(
                    AlertCategory::Drowsiness,
                    0,
                    30,
                    "Drowsiness",
                    "Drowsiness detected",
                    "Cabin",
                ),
                ConditionRule::preset(
                    AlertCategory::Yawn,
                    1,
                    1,
                    "Yawn",
                    "Yawn detected",
                    "Cabin",
                ),
            ],
            AnalyzerKind::Violence => vec![ConditionRule {
                notify: true,
                ..ConditionRule::preset(
                    AlertCategory::Violence,
                    1,
                    1,
                    "Violence",
                    "Violent activity detected in {location}.",
                    "Lobby",
                )
            }],
            AnalyzerKind::Loitering | AnalyzerKind::Crowding => Vec::new(),
        }
    }

    fn is_active(&self, frame: &FrameDetections) -> bool {
        frame
            .detections
            .iter()
            .any(|d| d.class_id == self.trigger_class && d.confidence > self.min_confidence)
    }

    fn candidate(&self) -> AlertCandidate {
        AlertCandidate {
            key: AlertKey::for_location(self.category, &self.location),
            draft: AlertDraft::new(
                &self.title,
                self.description.replace("{location}", &self.location),
                &self.location,
                self.severity.unwrap_or_else(|| self.category.default_severity()),
            ),
            notify: self.notify,
        }
    }
}

/// Session options. Without `rules` the analyzer's presets are used;
/// `location` and `notify` override every rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionOptions {
    pub rules: Option<Vec<ConditionRule>>,
    pub location: Option<String>,
    pub notify: Option<bool>,
}

struct RuleState {
    rule: ConditionRule,
    streak: u32,
}

pub struct ConditionAnalyzer {
    kind: AnalyzerKind,
    rules: Vec<RuleState>,
}

impl ConditionAnalyzer {
    pub fn new(kind: AnalyzerKind, options: ConditionOptions) -> Result<Self, ConfigError> {
        let mut rules = options
            .rules
            .unwrap_or_else(|| ConditionRule::presets(kind));

        if rules.is_empty() {
            return Err(ConfigError::InvalidOptions(format!(
                "analyzer '{}' has no condition rules",
                kind
            )));
        }

        for rule in &mut rules {
            if rule.consecutive_frames == 0 {
                return Err(ConfigError::InvalidOptions(format!(
                    "rule '{}' needs consecutive_frames of at least 1",
                    rule.title
                )));
            }
            if let Some(location) = &options.location {
                rule.location = location.clone();
            }
            if let Some(notify) = options.notify {
                rule.notify = notify;
            }
        }

        Ok(Self {
            kind,
            rules: rules
                .into_iter()
                .map(|rule| RuleState { rule, streak: 0 })
                .collect(),
        })
    }

    pub fn rules(&self) -> impl Iterator<Item = &ConditionRule> {
        self.rules.iter().map(|state| &state.rule)
    }
}

impl Analyzer for ConditionAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    fn process_frame(&mut self, frame: &FrameDetections) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        for state in &mut self.rules {
            if !state.rule.is_active(frame) {
                if state.streak > 0 {
                    debug!(rule = %state.rule.title, streak = state.streak, "condition cleared");
                }
                state.streak = 0;
                continue;
            }

            state.streak = state.streak.saturating_add(1);
            if state.streak >= state.rule.consecutive_frames {
                outcome.candidates.push(state.rule.candidate());
            }
        }

        outcome
    }
}
