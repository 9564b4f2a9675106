pub mod analyzer;
pub mod api;
pub mod config;
pub mod engine;
pub mod gate;
pub mod session;
pub mod source;
pub mod state;

pub use analyzer::{build_analyzer, Analyzer, AnalyzerKind};
pub use config::ServiceConfig;
pub use session::{run_session, SessionContext, SessionEnd, SessionSummary};
pub use source::{DetectionSource, JsonLinesSource, VecSource};
pub use state::EngineState;
