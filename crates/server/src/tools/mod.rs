//! MCP tool implementations.
//!
//! This module contains all tools exposed by the shellcache server.

pub mod sw_fetch;
pub mod sw_message;
pub mod sw_status;

pub use sw_fetch::{SwFetchOutput, SwFetchParams};
pub use sw_message::{SwMessageOutput, SwMessageParams};
