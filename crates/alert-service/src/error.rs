use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("alert registry lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("notification transport unavailable: {0}")]
    Unavailable(String),
}
