//! Core types for the call runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: function identifiers and module instance ids
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for modules, logging and faults

mod config;
mod errors;
mod ids;

pub use config::{Config, ConsoleConfig, FaultConfig, ModuleConfig, ObservabilityConfig};
pub use errors::{Error, ErrorKind, Result};
pub use ids::{FunctionId, ModuleId};
