use super::{secs_to_duration, AlertCandidate, Analyzer, AnalyzerKind, FrameOutcome};
use crate::engine::dwell::{DwellConfig, DwellTracker};
use alert_service::{AlertCategory, AlertDraft, AlertKey};
use common::detections::FrameDetections;
use common::zones::{ConfigError, PixelZone, ZoneCatalog};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoiteringOptions {
    pub subject_class: u32,
    pub min_confidence: f32,
    pub loitering_threshold_secs: f64,
    pub track_retention_secs: f64,
    /// Zones where any presence raises an alert immediately
    pub restricted_zones: Vec<String>,
    pub notify: bool,
}

impl Default for LoiteringOptions {
    fn default() -> Self {
        Self {
            subject_class: 0,
            min_confidence: 0.0,
            loitering_threshold_secs: 5.0,
            track_retention_secs: 30.0,
            restricted_zones: Vec::new(),
            notify: false,
        }
    }
}

/// Zone geometry fixed by the first decoded frame
struct FrameGeometry {
    width: u32,
    height: u32,
    zones: Vec<PixelZone>,
    mismatch_reported: bool,
}

pub struct LoiteringAnalyzer {
    options: LoiteringOptions,
    catalog: ZoneCatalog,
    tracker: DwellTracker,
    geometry: Option<FrameGeometry>,
}

impl LoiteringAnalyzer {
    pub fn new(options: LoiteringOptions, catalog: ZoneCatalog) -> Result<Self, ConfigError> {
        for name in &options.restricted_zones {
            if catalog.get(name).is_none() {
                return Err(ConfigError::InvalidOptions(format!(
                    "restricted zone '{}' is not in the zone catalog",
                    name
                )));
            }
        }

        let config = DwellConfig {
            loitering_threshold: secs_to_duration(
                "loitering_threshold_secs",
                options.loitering_threshold_secs,
            )?,
            track_retention: secs_to_duration("track_retention_secs", options.track_retention_secs)?,
        };

        if catalog.is_empty() {
            warn!("loitering analyzer started without zones, no alerts will be raised");
        }

        Ok(Self {
            options,
            catalog,
            tracker: DwellTracker::new(config),
            geometry: None,
        })
    }

    pub fn tracker(&self) -> &DwellTracker {
        &self.tracker
    }

    fn zones_for(&mut self, frame: &FrameDetections) -> &[PixelZone] {
        let catalog = &self.catalog;
        let geometry = self.geometry.get_or_insert_with(|| {
            debug!(width = frame.width, height = frame.height, "projecting zones onto frame");
            FrameGeometry {
                width: frame.width,
                height: frame.height,
                zones: catalog.denormalize(frame.width, frame.height),
                mismatch_reported: false,
            }
        });

        if (frame.width, frame.height) != (geometry.width, geometry.height)
            && !geometry.mismatch_reported
        {
            warn!(
                expected_width = geometry.width,
                expected_height = geometry.height,
                width = frame.width,
                height = frame.height,
                "frame size changed mid-session, keeping the original zone geometry"
            );
            geometry.mismatch_reported = true;
        }

        &geometry.zones
    }
}

impl Analyzer for LoiteringAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Loitering
    }

    fn process_frame(&mut self, frame: &FrameDetections) -> FrameOutcome {
        let now = frame.timestamp;
        let zones = self.zones_for(frame).to_vec();
        let mut outcome = FrameOutcome::default();

        for detection in &frame.detections {
            if detection.class_id != self.options.subject_class
                || detection.confidence <= self.options.min_confidence
            {
                continue;
            }
            let Some(track_id) = detection.track_id.as_deref() else {
                continue;
            };
            if !detection.bbox.is_valid() {
                debug!(track_id, bbox = ?detection.bbox, "skipping malformed detection");
                continue;
            }

            let centroid = detection.bbox.centroid();

            for zone in zones
                .iter()
                .filter(|z| self.options.restricted_zones.contains(&z.name))
                .filter(|z| z.contains(centroid))
            {
                outcome.candidates.push(AlertCandidate {
                    key: AlertKey::for_subject(AlertCategory::RestrictedZone, track_id, &zone.name),
                    draft: AlertDraft::new(
                        "Restricted Zone Entry",
                        format!("Person {} entered restricted zone {}", track_id, zone.name),
                        &zone.name,
                        AlertCategory::RestrictedZone.default_severity(),
                    ),
                    notify: self.options.notify,
                });
            }

            for candidate in self.tracker.observe(track_id, centroid, &zones, now) {
                debug!(
                    track_id,
                    zone = %candidate.zone,
                    dwell_ms = candidate.dwell.num_milliseconds(),
                    "loitering detected"
                );
                outcome.candidates.push(AlertCandidate {
                    key: AlertKey::for_subject(
                        AlertCategory::Loitering,
                        &candidate.track_id,
                        &candidate.zone,
                    ),
                    draft: AlertDraft::new(
                        "Loitering",
                        format!(
                            "Person {} loitering in {} for {:.1}s",
                            candidate.track_id,
                            candidate.zone,
                            candidate.dwell.num_milliseconds() as f64 / 1000.0
                        ),
                        &candidate.zone,
                        AlertCategory::Loitering.default_severity(),
                    ),
                    notify: self.options.notify,
                });
            }
        }

        let pruned = self.tracker.prune(now);
        if pruned > 0 {
            debug!(pruned, "forgot tracks no longer observed");
        }

        outcome
    }
}
