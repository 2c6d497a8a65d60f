//! Core types, traits, and error definitions for opsmith.
//!
//! This crate provides the foundational building blocks shared across all
//! layers of the automation server.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
