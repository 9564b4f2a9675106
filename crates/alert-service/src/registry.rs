//! In-memory alert registry shared by analyzer sessions and the polling API.
//!
//! Every operation takes the same mutex for its whole duration, so raises,
//! expiry passes and drains are linearizable with respect to each other. The
//! lock is never held across an `.await`.

use crate::error::RegistryError;
use crate::types::{AlertBatch, AlertDraft, AlertKey, AlertRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use telemetry::metrics::{ALERTS_DRAINED, ALERTS_EXPIRED, ALERTS_RAISED};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of raising an alert
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    /// No active record existed; this is the activation edge
    Created(AlertRecord),
    /// An active record existed and was refreshed
    Refreshed(AlertRecord),
}

impl RaiseOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, RaiseOutcome::Created(_))
    }

    pub fn record(&self) -> &AlertRecord {
        match self {
            RaiseOutcome::Created(r) | RaiseOutcome::Refreshed(r) => r,
        }
    }
}

#[derive(Clone, Default)]
pub struct AlertRegistry {
    alerts: Arc<Mutex<HashMap<AlertKey, AlertRecord>>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<AlertKey, AlertRecord>>, RegistryError> {
        self.alerts.lock().map_err(|_| RegistryError::Poisoned)
    }

    pub fn raise(&self, key: AlertKey, draft: AlertDraft) -> Result<RaiseOutcome, RegistryError> {
        self.raise_at(key, draft, Utc::now())
    }

    /// Create the record for `key`, or refresh the active one.
    ///
    /// A refresh keeps `id` and `created_at`, moves `last_seen` forward (never
    /// backward), takes the latest description and keeps the highest severity.
    pub fn raise_at(
        &self,
        key: AlertKey,
        draft: AlertDraft,
        now: DateTime<Utc>,
    ) -> Result<RaiseOutcome, RegistryError> {
        let category = key.category.to_string();
        let mut alerts = self.lock()?;

        let outcome = match alerts.entry(key) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now > record.last_seen {
                    record.last_seen = now;
                }
                record.description = draft.description;
                record.severity = record.severity.max(draft.severity);
                RaiseOutcome::Refreshed(record.clone())
            }
            Entry::Vacant(entry) => {
                let record = AlertRecord {
                    id: Uuid::new_v4().to_string(),
                    title: draft.title,
                    description: draft.description,
                    location: draft.location,
                    severity: draft.severity,
                    created_at: now,
                    last_seen: now,
                };
                info!(
                    key = %entry.key(),
                    alert_id = %record.id,
                    severity = %record.severity,
                    "alert activated"
                );
                entry.insert(record.clone());
                RaiseOutcome::Created(record)
            }
        };

        let label = if outcome.is_created() { "created" } else { "refreshed" };
        ALERTS_RAISED.with_label_values(&[&category, label]).inc();

        Ok(outcome)
    }

    pub fn expire_stale(&self, ttl: Duration) -> Result<Vec<AlertKey>, RegistryError> {
        self.expire_stale_at(ttl, Utc::now())
    }

    /// Remove every record with `now - last_seen > ttl` and return their keys
    pub fn expire_stale_at(
        &self,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertKey>, RegistryError> {
        let mut alerts = self.lock()?;
        let mut expired = Vec::new();

        alerts.retain(|key, record| {
            let keep = now - record.last_seen <= ttl;
            if !keep {
                expired.push(key.clone());
            }
            keep
        });

        if !expired.is_empty() {
            debug!(count = expired.len(), "expired stale alerts");
            ALERTS_EXPIRED.inc_by(expired.len() as u64);
        }

        Ok(expired)
    }

    /// Take every held record, leaving the registry empty
    pub fn drain(&self) -> Result<HashMap<AlertKey, Vec<AlertRecord>>, RegistryError> {
        let taken = std::mem::take(&mut *self.lock()?);
        ALERTS_DRAINED.inc_by(taken.len() as u64);

        Ok(taken
            .into_iter()
            .map(|(key, record)| (key, vec![record]))
            .collect())
    }

    /// Drain and render in the polling wire format. Distinct keys that render
    /// to the same string share one list.
    pub fn drain_batch(&self) -> Result<AlertBatch, RegistryError> {
        let mut batch = AlertBatch::new();
        for (key, records) in self.drain()? {
            batch
                .entry(key.to_string())
                .or_default()
                .extend(records.iter().map(AlertRecord::to_wire));
        }
        Ok(batch)
    }

    /// Non-destructive copy of the current records
    pub fn snapshot(&self) -> Result<HashMap<AlertKey, AlertRecord>, RegistryError> {
        Ok(self.lock()?.clone())
    }

    pub fn get(&self, key: &AlertKey) -> Result<Option<AlertRecord>, RegistryError> {
        Ok(self.lock()?.get(key).cloned())
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.lock()?.is_empty())
    }
}
