//! Per-entity zone dwell tracking.
//!
//! Each `(track, zone)` pair is an independent state machine:
//! Absent -> Entering on the first frame the centroid is inside,
//! Entering -> Loitering once dwell exceeds the threshold, and back to Absent
//! on the first frame the entity is observed outside. Occupancy is evaluated
//! strictly per frame, so a single frame of tracker flicker resets the clock.

use chrono::{DateTime, Duration, Utc};
use common::detections::Point;
use common::zones::PixelZone;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DwellConfig {
    /// Dwell beyond which an entity is loitering (strictly greater)
    pub loitering_threshold: Duration,
    /// Entities not observed for longer than this are forgotten
    pub track_retention: Duration,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            loitering_threshold: Duration::seconds(5),
            track_retention: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellState {
    Absent,
    Entering,
    Loitering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoiteringCandidate {
    pub track_id: String,
    pub zone: String,
    pub dwell: Duration,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct EntityDwell {
    last_observed: DateTime<Utc>,
    /// zone name -> first frame seen inside
    zones: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct DwellTracker {
    config: DwellConfig,
    entities: HashMap<String, EntityDwell>,
}

impl DwellTracker {
    pub fn new(config: DwellConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
        }
    }

    /// Re-evaluate one observed entity against every zone and return a
    /// candidate for each zone it has been loitering in.
    pub fn observe(
        &mut self,
        track_id: &str,
        centroid: Point,
        zones: &[PixelZone],
        now: DateTime<Utc>,
    ) -> Vec<LoiteringCandidate> {
        let entity = self
            .entities
            .entry(track_id.to_string())
            .or_insert_with(|| EntityDwell {
                last_observed: now,
                zones: HashMap::new(),
            });
        entity.last_observed = now;

        let mut candidates = Vec::new();

        for zone in zones {
            if !zone.contains(centroid) {
                if entity.zones.remove(&zone.name).is_some() {
                    debug!(track_id, zone = %zone.name, "entity left zone, dwell reset");
                }
                continue;
            }

            match entity.zones.get(&zone.name) {
                None => {
                    debug!(track_id, zone = %zone.name, "entity entered zone");
                    entity.zones.insert(zone.name.clone(), now);
                }
                Some(first_seen) => {
                    let dwell = now - *first_seen;
                    if dwell > self.config.loitering_threshold {
                        candidates.push(LoiteringCandidate {
                            track_id: track_id.to_string(),
                            zone: zone.name.clone(),
                            dwell,
                            at: now,
                        });
                    }
                }
            }
        }

        candidates
    }

    /// Forget entities that have not been observed within the retention window.
    /// Returns how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.config.track_retention;
        let before = self.entities.len();
        self.entities
            .retain(|_, entity| now - entity.last_observed <= retention);
        before - self.entities.len()
    }

    pub fn dwell_time(&self, track_id: &str, zone: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.entities
            .get(track_id)
            .and_then(|entity| entity.zones.get(zone))
            .map(|first_seen| now - *first_seen)
    }

    pub fn state(&self, track_id: &str, zone: &str, now: DateTime<Utc>) -> DwellState {
        match self.dwell_time(track_id, zone, now) {
            None => DwellState::Absent,
            Some(dwell) if dwell > self.config.loitering_threshold => DwellState::Loitering,
            Some(_) => DwellState::Entering,
        }
    }

    pub fn tracked_entities(&self) -> usize {
        self.entities.len()
    }
}
