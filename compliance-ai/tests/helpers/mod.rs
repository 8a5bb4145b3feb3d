//! Test Helper Utilities
//!
//! Shared utilities for testing compliance-ai

#![allow(dead_code)]

pub mod context;
pub mod fake_ai;

pub use context::{next_frame, no_frame_within, wait_until, TestContext, ALICE, BOB, SECRET};
pub use fake_ai::{frame, FakeAi, FakeAiScript, StreamEnd};
