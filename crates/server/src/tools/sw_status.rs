//! sw_status tool implementation.
//!
//! Reports lifecycle state, the current cache, every cache in storage and the
//! last install report.

use rmcp::{ErrorData as McpError, model::*};
use shellcache_client::{Fetcher, ServiceWorker};

/// Implementation of the sw_status tool.
pub async fn status_impl<F: Fetcher>(worker: &ServiceWorker<F>) -> Result<CallToolResult, McpError> {
    let status = worker.status().await?;

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&status).unwrap_or_default(),
    )]))
}
