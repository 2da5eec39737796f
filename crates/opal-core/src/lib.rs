//! Opal Core
//!
//! Shared utilities for the opal GUI rendering stack: logging setup,
//! profiling markers, and the generic geometry types used across crates.

pub mod geometry;
pub mod logging;
pub mod profiling;
