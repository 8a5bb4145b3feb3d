//! Data models for compliance-ai

pub mod comparison_job;
pub mod framework;
pub mod processing_job;

pub use comparison_job::{mean_score, ComparisonJob, ComparisonSummary};
pub use framework::Framework;
pub use processing_job::{JobUpdate, ProcessingJob, Transition};
