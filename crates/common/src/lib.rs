pub mod detections;
pub mod zones;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
