//! Core types and utilities for detection corpus balancing.
//!
//! This crate provides the shared annotation types, run configuration,
//! error type and CLI helpers used across the workspace.

pub mod cli;
pub mod config;
pub mod error;
pub mod types;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
