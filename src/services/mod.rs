pub mod color_metric;
pub mod constraint_validator;
pub mod differential_evolution;
pub mod fitness;
pub mod kubelka_munk;
pub mod metrics;
pub mod mixing;
pub mod orchestrator;
pub mod tpe;
