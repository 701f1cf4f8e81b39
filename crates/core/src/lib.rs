//! Core utilities for the lockstep framework.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer and frame statistics
//! - Launch options

mod config;
mod error;
mod logging;
mod timer;

pub use config::{LaunchOptions, SHADER_DIR_ENV};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FRAME_TIME_ALPHA, FrameStats, Timer};
