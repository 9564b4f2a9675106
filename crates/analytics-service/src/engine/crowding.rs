//! Per-frame crowding statistics: subject count, mean pairwise overlap and
//! the discrete crowding level derived from them.

use common::detections::{BoundingBox, Detection};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdingThresholds {
    /// Mean overlap at or above which a frame is crowded
    pub crowded_overlap: f64,
    /// Mean overlap above which a frame is moderately crowded
    pub moderate_overlap: f64,
    /// Subject count above which a frame is crowded regardless of overlap
    pub max_subjects: usize,
}

impl Default for CrowdingThresholds {
    fn default() -> Self {
        Self {
            crowded_overlap: 0.5,
            moderate_overlap: 0.2,
            max_subjects: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrowdingLevel {
    Normal,
    ModeratelyCrowded,
    Crowded,
}

impl CrowdingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrowdingLevel::Normal => "normal",
            CrowdingLevel::ModeratelyCrowded => "moderately_crowded",
            CrowdingLevel::Crowded => "crowded",
        }
    }
}

impl fmt::Display for CrowdingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdingReport {
    pub subject_count: usize,
    pub object_count: usize,
    pub mean_overlap: f64,
    pub level: CrowdingLevel,
}

/// Average IoU over all unordered pairs, 0.0 with fewer than two boxes
pub fn mean_pairwise_iou(boxes: &[BoundingBox]) -> f64 {
    if boxes.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in boxes.iter().enumerate() {
        for b in &boxes[i + 1..] {
            total += a.iou(b);
            pairs += 1;
        }
    }

    total / pairs as f64
}

/// First matching rule wins: crowded, then moderately crowded, then normal
pub fn classify(
    mean_overlap: f64,
    subject_count: usize,
    thresholds: &CrowdingThresholds,
) -> CrowdingLevel {
    if mean_overlap >= thresholds.crowded_overlap || subject_count > thresholds.max_subjects {
        CrowdingLevel::Crowded
    } else if mean_overlap > thresholds.moderate_overlap {
        CrowdingLevel::ModeratelyCrowded
    } else {
        CrowdingLevel::Normal
    }
}

/// Count and classify one frame. Detections below `min_confidence` or with an
/// unusable box are ignored entirely.
pub fn analyze_frame(
    detections: &[Detection],
    subject_class: u32,
    min_confidence: f32,
    thresholds: &CrowdingThresholds,
) -> CrowdingReport {
    let mut subjects = Vec::new();
    let mut object_count = 0;

    for detection in detections {
        if detection.confidence <= min_confidence {
            continue;
        }
        if !detection.bbox.is_valid() {
            tracing::debug!(bbox = ?detection.bbox, "skipping malformed detection");
            continue;
        }

        if detection.class_id == subject_class {
            subjects.push(detection.bbox);
        } else {
            object_count += 1;
        }
    }

    let mean_overlap = mean_pairwise_iou(&subjects);

    CrowdingReport {
        subject_count: subjects.len(),
        object_count,
        mean_overlap,
        level: classify(mean_overlap, subjects.len(), thresholds),
    }
}
