pub mod aggregate;
pub mod orchestrator;
pub mod result;
pub mod scenario;
