pub mod config;
pub mod models;
pub mod services;
pub mod state;

// Re-export for convenience
pub use config::EngineSettings;
pub use models::{OptimizationError, OptimizationOutcome, OptimizationRequest};
pub use services::orchestrator::Optimizer;
pub use state::EngineState;
