//! Zone catalog: named polygons in frame-normalized coordinates.
//!
//! Zones are authored once against a reference frame and stored normalized to
//! `[0, 1]`. A session denormalizes them against the dimensions of the first
//! frame it decodes and keeps that pixel geometry for the rest of the run.

use crate::detections::Point;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MIN_POLYGON_POINTS: usize = 3;
const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read zone config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid zone config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("zone '{zone}' has {count} points, at least 3 are required")]
    TooFewPoints { zone: String, count: usize },

    #[error("zone '{0}' is defined more than once")]
    DuplicateZone(String),

    #[error("zone '{zone}' has coordinate ({x}, {y}) outside the normalized range [0, 1]")]
    CoordinateOutOfRange { zone: String, x: f64, y: f64 },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// On-disk zone file: `{ frame_width, frame_height, zones: { name: [[x, y], ...] } }`
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfigFile {
    /// Width of the frame the zones were drawn on (informational)
    #[serde(default)]
    pub frame_width: Option<u32>,

    /// Height of the frame the zones were drawn on (informational)
    #[serde(default)]
    pub frame_height: Option<u32>,

    #[serde(default)]
    pub zones: ZoneEntries,
}

/// Zone entries in file order. Duplicate keys are preserved so that they can
/// be rejected instead of silently overwritten.
#[derive(Debug, Clone, Default)]
pub struct ZoneEntries(pub Vec<(String, Vec<[f64; 2]>)>);

impl<'de> Deserialize<'de> for ZoneEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ZoneEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of zone name to a list of [x, y] points")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, points)) = map.next_entry::<String, Vec<[f64; 2]>>()? {
                    entries.push((name, points));
                }
                Ok(ZoneEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// A named polygon in normalized coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub name: String,
    pub polygon: Vec<Point>,
}

/// A zone projected onto a concrete frame size
#[derive(Debug, Clone, PartialEq)]
pub struct PixelZone {
    pub name: String,
    pub polygon: Vec<Point>,
}

impl PixelZone {
    pub fn contains(&self, point: Point) -> bool {
        point_in_polygon(point, &self.polygon)
    }
}

/// Immutable set of zones loaded once per run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
}

impl ZoneCatalog {
    /// Load and validate a zone file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: ZoneConfigFile = serde_json::from_str(raw)?;
        Self::from_config(file)
    }

    pub fn from_config(file: ZoneConfigFile) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut zones = Vec::with_capacity(file.zones.0.len());

        for (name, points) in file.zones.0 {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateZone(name));
            }

            if points.len() < MIN_POLYGON_POINTS {
                return Err(ConfigError::TooFewPoints {
                    zone: name,
                    count: points.len(),
                });
            }

            let mut polygon = Vec::with_capacity(points.len());
            for [x, y] in points {
                if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                    return Err(ConfigError::CoordinateOutOfRange { zone: name, x, y });
                }
                polygon.push(Point::new(x, y));
            }

            zones.push(Zone { name, polygon });
        }

        tracing::debug!(zones = zones.len(), "zone catalog loaded");
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Project every zone onto a `width` x `height` frame. Zones that collapse
    /// to zero area at this resolution are skipped.
    pub fn denormalize(&self, width: u32, height: u32) -> Vec<PixelZone> {
        let (w, h) = (width as f64, height as f64);

        self.zones
            .iter()
            .filter_map(|zone| {
                let polygon: Vec<Point> = zone
                    .polygon
                    .iter()
                    .map(|p| Point::new((p.x * w).round(), (p.y * h).round()))
                    .collect();

                if polygon_area(&polygon) <= 0.0 {
                    tracing::warn!(
                        zone = %zone.name,
                        width,
                        height,
                        "zone has no area at this frame size, skipping"
                    );
                    return None;
                }

                Some(PixelZone {
                    name: zone.name.clone(),
                    polygon,
                })
            })
            .collect()
    }
}

/// Absolute polygon area via the shoelace formula
pub fn polygon_area(polygon: &[Point]) -> f64 {
    if polygon.len() < MIN_POLYGON_POINTS {
        return 0.0;
    }

    let mut twice_area = 0.0;
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[(i + 1) % polygon.len()];
        twice_area += a.x * b.y - b.x * a.y;
    }
    twice_area.abs() / 2.0
}

/// Ray-casting containment test. Points on an edge or vertex are inside.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < MIN_POLYGON_POINTS || !point.x.is_finite() || !point.y.is_finite() {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[j];

        if on_segment(point, a, b) {
            return true;
        }

        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }

        j = i;
    }

    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }

    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn test_point_in_polygon_interior_and_exterior() {
        let poly = square();
        assert!(point_in_polygon(Point::new(5.0, 5.0), &poly));
        assert!(!point_in_polygon(Point::new(15.0, 5.0), &poly));
        assert!(!point_in_polygon(Point::new(-0.1, 5.0), &poly));
    }

    #[test]
    fn test_point_in_polygon_boundary_is_inside() {
        let poly = square();
        assert!(point_in_polygon(Point::new(0.0, 5.0), &poly));
        assert!(point_in_polygon(Point::new(10.0, 10.0), &poly));
        assert!(point_in_polygon(Point::new(5.0, 0.0), &poly));
    }

    #[test]
    fn test_point_in_concave_polygon() {
        // U shape, the notch between the arms is outside
        let poly = vec![
            Point::new(0.0, 0.0),
            Point::new(9.0, 0.0),
            Point::new(9.0, 9.0),
            Point::new(6.0, 9.0),
            Point::new(6.0, 3.0),
            Point::new(3.0, 3.0),
            Point::new(3.0, 9.0),
            Point::new(0.0, 9.0),
        ];
        assert!(point_in_polygon(Point::new(1.5, 6.0), &poly));
        assert!(!point_in_polygon(Point::new(4.5, 6.0), &poly));
        assert!(point_in_polygon(Point::new(4.5, 1.5), &poly));
    }

    #[test]
    fn test_load_catalog() {
        let raw = r#"{
            "frame_width": 1280,
            "frame_height": 720,
            "zones": {
                "entrance": [[0.1, 0.1], [0.5, 0.1], [0.5, 0.5], [0.1, 0.5]],
                "bench": [[0.6, 0.6], [0.9, 0.6], [0.75, 0.9]]
            }
        }"#;

        let catalog = ZoneCatalog::from_json(raw).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.zones()[0].name, "entrance");
        assert!(catalog.get("bench").is_some());
    }

    #[test]
    fn test_rejects_too_few_points() {
        let raw = r#"{ "zones": { "line": [[0.1, 0.1], [0.5, 0.5]] } }"#;
        let err = ZoneCatalog::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::TooFewPoints { count: 2, .. }));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let raw = r#"{ "zones": {
            "gate": [[0.1, 0.1], [0.5, 0.1], [0.5, 0.5]],
            "gate": [[0.2, 0.2], [0.6, 0.2], [0.6, 0.6]]
        } }"#;
        let err = ZoneCatalog::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateZone(name) if name == "gate"));
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        let raw = r#"{ "zones": { "far": [[0.1, 0.1], [1.5, 0.1], [0.5, 0.5]] } }"#;
        let err = ZoneCatalog::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::CoordinateOutOfRange { .. }));
    }

    #[test]
    fn test_denormalize_scales_and_skips_degenerate() {
        let raw = r#"{ "zones": {
            "half": [[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]],
            "flat": [[0.1, 0.5], [0.5, 0.5], [0.9, 0.5]]
        } }"#;

        let catalog = ZoneCatalog::from_json(raw).unwrap();
        let pixel = catalog.denormalize(200, 100);

        assert_eq!(pixel.len(), 1);
        assert_eq!(pixel[0].name, "half");
        assert_eq!(pixel[0].polygon[2], Point::new(100.0, 100.0));
        assert!(pixel[0].contains(Point::new(50.0, 50.0)));
        assert!(!pixel[0].contains(Point::new(150.0, 50.0)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "zones": {{ "lobby": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]] }} }}"#
        )
        .unwrap();

        let catalog = ZoneCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);

        let missing = ZoneCatalog::load("/nonexistent/zone_config.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
