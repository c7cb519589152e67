//! Testing utilities for reactflow graphs.
//!
//! This module provides:
//! - A recording subscriber that drives demand by hand
//! - A hand-driven publisher
//! - An acknowledgement probe

mod mocks;
mod subscriber;

pub use mocks::{AckProbe, ManualPublisher};
pub use subscriber::{Signal, TestSubscriber};
