use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Allows one analyzer session at a time. Triggers while busy are rejected,
/// never queued.
#[derive(Clone)]
pub struct SessionGate {
    permits: Arc<Semaphore>,
}

/// Held for the lifetime of a session; dropping it reopens the gate
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn try_enter(&self) -> Option<SessionPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SessionPermit { _permit: permit })
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}
