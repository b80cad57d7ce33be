//! Core types and utilities for the GTSRB traffic-sign data pipeline.
//!
//! This crate holds the pieces every stage shares: the dataset container,
//! label representations, per-class counts, configuration and the error type.

pub mod cli;
pub mod config;
pub mod error;
pub mod types;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use types::*;
