pub mod error;
pub mod notifier;
pub mod registry;
pub mod routes;
pub mod types;

// Re-export commonly used types
pub use error::{RegistryError, TransportError};
pub use notifier::{dispatch_detached, LogDispatcher, NotificationDispatcher, WebhookDispatcher};
pub use registry::{AlertRegistry, RaiseOutcome};
pub use routes::{create_router, AppState};
pub use types::*;
