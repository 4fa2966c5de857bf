//! Domain layer for the conductor orchestration core
//!
//! This module contains the core models, errors and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
