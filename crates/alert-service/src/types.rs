use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// What kind of condition an alert reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Loitering,
    RestrictedZone,
    Overcrowding,
    ModerateCrowding,
    CrowdSurge,
    GenderPresence,
    Drowsiness,
    Yawn,
    Violence,
}

impl AlertCategory {
    /// Severity used when an analyzer does not override it
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertCategory::ModerateCrowding | AlertCategory::Yawn => Severity::Info,
            AlertCategory::Loitering
            | AlertCategory::GenderPresence
            | AlertCategory::Drowsiness => Severity::Warning,
            AlertCategory::RestrictedZone | AlertCategory::Overcrowding => Severity::Error,
            AlertCategory::CrowdSurge | AlertCategory::Violence => Severity::Critical,
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertCategory::Loitering => "loitering",
            AlertCategory::RestrictedZone => "restricted_zone",
            AlertCategory::Overcrowding => "overcrowding",
            AlertCategory::ModerateCrowding => "moderate_crowding",
            AlertCategory::CrowdSurge => "crowd_surge",
            AlertCategory::GenderPresence => "gender_presence",
            AlertCategory::Drowsiness => "drowsiness",
            AlertCategory::Yawn => "yawn",
            AlertCategory::Violence => "violence",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AlertCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loitering" => Ok(AlertCategory::Loitering),
            "restricted_zone" => Ok(AlertCategory::RestrictedZone),
            "overcrowding" => Ok(AlertCategory::Overcrowding),
            "moderate_crowding" => Ok(AlertCategory::ModerateCrowding),
            "crowd_surge" => Ok(AlertCategory::CrowdSurge),
            "gender_presence" => Ok(AlertCategory::GenderPresence),
            "drowsiness" => Ok(AlertCategory::Drowsiness),
            "yawn" => Ok(AlertCategory::Yawn),
            "violence" => Ok(AlertCategory::Violence),
            _ => Err(format!("Invalid alert category: {}", s)),
        }
    }
}

/// Deduplication key. Per-entity alerts carry the track id as `subject`;
/// population-level and fixed-category alerts leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub category: AlertCategory,
    pub subject: Option<String>,
    pub location: String,
}

impl AlertKey {
    pub fn for_subject(
        category: AlertCategory,
        subject: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            category,
            subject: Some(subject.into()),
            location: location.into(),
        }
    }

    pub fn for_location(category: AlertCategory, location: impl Into<String>) -> Self {
        Self {
            category,
            subject: None,
            location: location.into(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}:{}:{}", self.category, subject, self.location),
            None => write!(f, "{}:{}", self.category, self.location),
        }
    }
}

/// What an analyzer asks the registry to raise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub title: String,
    pub description: String,
    pub location: String,
    pub severity: Severity,
}

impl AlertDraft {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            location: location.into(),
            severity,
        }
    }
}

/// An alert held by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AlertRecord {
    /// Wire representation consumed by polling clients
    pub fn to_wire(&self) -> AlertWire {
        AlertWire {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            timestamp: self.last_seen.to_rfc3339(),
        }
    }
}

/// `{ id, title, description, location, timestamp }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertWire {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub timestamp: String,
}

/// Drained alert batch keyed by the rendered alert key
pub type AlertBatch = BTreeMap<String, Vec<AlertWire>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_category_round_trip_through_str() {
        for category in [
            AlertCategory::Loitering,
            AlertCategory::RestrictedZone,
            AlertCategory::CrowdSurge,
            AlertCategory::Violence,
        ] {
            assert_eq!(AlertCategory::from_str(&category.to_string()).unwrap(), category);
        }
        assert!(AlertCategory::from_str("fire").is_err());
    }

    #[test]
    fn test_key_rendering() {
        let per_entity = AlertKey::for_subject(AlertCategory::Loitering, "17", "entrance");
        assert_eq!(per_entity.to_string(), "loitering:17:entrance");

        let population = AlertKey::for_location(AlertCategory::Overcrowding, "Quadrangle");
        assert_eq!(population.to_string(), "overcrowding:Quadrangle");
    }

    #[test]
    fn test_wire_schema() {
        let now = Utc::now();
        let record = AlertRecord {
            id: "a1".to_string(),
            title: "Violence".to_string(),
            description: "Violent activity detected in Lobby.".to_string(),
            location: "Lobby".to_string(),
            severity: Severity::Critical,
            created_at: now,
            last_seen: now,
        };

        let json = serde_json::to_value(record.to_wire()).unwrap();
        let fields: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(json["timestamp"], now.to_rfc3339());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert_eq!(AlertCategory::CrowdSurge.default_severity(), Severity::Critical);
    }
}
