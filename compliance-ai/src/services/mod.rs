//! Orchestration services

pub mod comparison;
pub mod poller;
pub mod processing;
pub mod registry;

pub use comparison::ComparisonService;
pub use poller::{ReconciliationPoller, TickSummary};
pub use processing::{ProcessingService, StatusCheck};
pub use registry::{ConnectionRegistry, Relay, RelayHub};
