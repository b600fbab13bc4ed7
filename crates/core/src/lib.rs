//! Core types and shared functionality for shellcache.
//!
//! This crate provides:
//! - Cache storage with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use store::{Cache, CacheStorage, ResponseKind, ResponseSnapshot};
