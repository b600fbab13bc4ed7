//! SQLite-backed cache storage for response snapshots.
//!
//! This module provides a persistent area of named caches using SQLite with
//! async access via tokio-rusqlite. It supports:
//!
//! - Named caches enumerated in creation order
//! - Last-write-wins snapshot upserts with a body digest
//! - Cascading cache deletion
//! - Automatic schema migrations and WAL mode

pub mod cache;
pub mod connection;
pub mod migrations;
pub mod snapshot;

pub use cache::{Cache, EntryInfo};
pub use connection::CacheStorage;
pub use snapshot::{ResponseKind, ResponseSnapshot};
