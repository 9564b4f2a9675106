pub mod crowding;
pub mod dwell;
pub mod trend;

pub use crowding::{analyze_frame, classify, CrowdingLevel, CrowdingReport, CrowdingThresholds};
pub use dwell::{DwellConfig, DwellState, DwellTracker, LoiteringCandidate};
pub use trend::{CrowdSample, Trend, TrendConfig, TrendDetector};
