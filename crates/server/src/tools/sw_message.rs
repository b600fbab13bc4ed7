//! sw_message tool implementation.
//!
//! Delivers a message posted by a page, such as `{"type": "SKIP_WAITING"}`.

use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shellcache_client::{Fetcher, ServiceWorker};

/// Input parameters for sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageParams {
    /// The message payload. Unrecognized messages are ignored.
    pub message: Value,
}

/// Output structure for sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageOutput {
    /// Whether the worker acted on the message.
    pub recognized: bool,
    /// Whether activation may proceed without waiting.
    pub skip_waiting: bool,
    /// Lifecycle state after delivery.
    pub state: String,
}

/// Implementation of the sw_message tool.
pub async fn message_impl<F: Fetcher>(
    worker: &ServiceWorker<F>, params: SwMessageParams,
) -> Result<CallToolResult, McpError> {
    let recognized = worker.handle_message(&params.message);
    let output = SwMessageOutput {
        recognized,
        skip_waiting: worker.skip_waiting_requested(),
        state: worker.state().to_string(),
    };

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}
