//! # Compliance Common Library
//!
//! Shared code for the compliance analysis services:
//! - Error types
//! - Service configuration loading
//! - Outbound notification frames (the relay socket protocol)
//! - Notification socket token verification
//! - Timestamp helpers

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
