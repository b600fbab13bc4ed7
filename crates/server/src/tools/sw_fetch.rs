//! sw_fetch tool implementation.
//!
//! Delivers a page request to the worker and reports how it was answered.
//! Requests the worker does not intercept are not forwarded anywhere.

use base64::{Engine as _, engine::general_purpose};
use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shellcache_client::{FetchRequest, Fetcher, Method, RequestMode, Route, ServiceWorker};
use shellcache_core::{Error, ResponseKind, ResponseSnapshot};
use std::collections::BTreeMap;
use url::Url;

/// Input parameters for sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchParams {
    /// Absolute URL of the request.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Request mode: "navigate", "same-origin", "no-cors" (default) or "cors".
    #[serde(default)]
    pub mode: Option<String>,

    /// Accept header value.
    #[serde(default)]
    pub accept: Option<String>,

    /// Additional request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchOutput {
    /// Whether the worker answered the request.
    pub intercepted: bool,
    /// Route chosen for the request: "passthrough", "navigation" or "static_asset".
    pub route: String,
    pub status: Option<u16>,
    /// Whether the response was readable (basic) or opaque.
    pub kind: Option<ResponseKind>,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    /// Body bytes, standard base64. Empty when not intercepted.
    pub body: String,
    /// Body as text when it is valid UTF-8.
    pub body_text: Option<String>,
    pub body_len: usize,
    pub body_sha256: Option<String>,
}

impl SwFetchOutput {
    fn passthrough(route: Route) -> Self {
        Self {
            intercepted: false,
            route: route_name(route).into(),
            status: None,
            kind: None,
            headers: Vec::new(),
            content_type: None,
            body: String::new(),
            body_text: None,
            body_len: 0,
            body_sha256: None,
        }
    }

    fn answered(route: Route, response: ResponseSnapshot) -> Self {
        let content_type = response.content_type().map(String::from);
        let body_sha256 = Some(response.body_digest());
        let body_len = response.body.len();
        let body = general_purpose::STANDARD.encode(&response.body);
        let body_text = String::from_utf8(response.body).ok();

        Self {
            intercepted: true,
            route: route_name(route).into(),
            status: Some(response.status),
            kind: Some(response.kind),
            headers: response.headers,
            content_type,
            body,
            body_text,
            body_len,
            body_sha256,
        }
    }
}

fn route_name(route: Route) -> &'static str {
    match route {
        Route::Passthrough => "passthrough",
        Route::Navigation => "navigation",
        Route::StaticAsset => "static_asset",
    }
}

fn build_request(params: &SwFetchParams) -> Result<FetchRequest, Error> {
    let url = Url::parse(params.url.trim()).map_err(|e| Error::InvalidUrl(format!("{}: {e}", params.url)))?;
    let method = Method::from_bytes(params.method.trim().to_uppercase().as_bytes())
        .map_err(|_| Error::InvalidInput(format!("invalid method: {}", params.method)))?;

    let mut request = FetchRequest::get(url).with_method(method);
    if let Some(mode) = params.mode.as_deref() {
        let mode = RequestMode::parse(mode).ok_or_else(|| Error::InvalidInput(format!("unknown request mode: {mode}")))?;
        request = request.with_mode(mode);
    }
    if let Some(accept) = params.accept.as_deref() {
        request = request.with_header("Accept", accept);
    }
    for (name, value) in &params.headers {
        request = request.with_header(name.as_str(), value.as_str());
    }
    Ok(request)
}

/// Implementation of the sw_fetch tool.
pub async fn fetch_impl<F: Fetcher>(worker: &ServiceWorker<F>, params: SwFetchParams) -> Result<CallToolResult, McpError> {
    let request = build_request(&params)?;
    let route = worker.classify(&request);

    let output = match worker.handle_fetch(&request).await {
        None => SwFetchOutput::passthrough(route),
        Some(result) => SwFetchOutput::answered(route, result?),
    };

    tracing::debug!(url = %request.url, route = %output.route, intercepted = output.intercepted, "sw_fetch");

    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&output).unwrap_or_default(),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{StaticNetwork, parse_output, worker_with};

    fn params(url: &str) -> SwFetchParams {
        SwFetchParams {
            url: url.into(),
            method: default_method(),
            mode: None,
            accept: None,
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_build_request_defaults() {
        let request = build_request(&params("https://app.example/assets/app.js")).unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.mode, RequestMode::NoCors);
        assert_eq!(request.accept(), "");
    }

    #[test]
    fn test_build_request_rejects_bad_input() {
        assert!(matches!(build_request(&params("not a url")), Err(Error::InvalidUrl(_))));

        let bad_mode = SwFetchParams { mode: Some("teleport".into()), ..params("https://app.example/") };
        assert!(matches!(build_request(&bad_mode), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_build_request_method_and_headers() {
        let p = SwFetchParams {
            method: "post".into(),
            accept: Some("text/html".into()),
            headers: BTreeMap::from([("X-Requested-With".to_string(), "fetch".to_string())]),
            ..params("https://app.example/api")
        };
        let request = build_request(&p).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.accept(), "text/html");
        assert_eq!(request.header("x-requested-with"), Some("fetch"));
    }

    #[tokio::test]
    async fn test_fetch_before_activation_not_intercepted() {
        let worker = worker_with(StaticNetwork::shell()).await;

        let p = SwFetchParams { mode: Some("navigate".into()), ..params("https://app.example/trips") };
        let output: SwFetchOutput = parse_output(fetch_impl(&worker, p).await.unwrap());
        assert!(!output.intercepted);
        assert_eq!(output.route, "navigation");
        assert_eq!(output.status, None);
    }

    #[tokio::test]
    async fn test_fetch_navigation_serves_shell() {
        let worker = worker_with(StaticNetwork::shell()).await;
        worker.run_lifecycle().await.unwrap();

        let p = SwFetchParams { accept: Some("text/html".into()), ..params("https://app.example/trips/7") };
        let output: SwFetchOutput = parse_output(fetch_impl(&worker, p).await.unwrap());
        assert!(output.intercepted);
        assert_eq!(output.status, Some(200));
        assert_eq!(output.body_text.as_deref(), Some("<!doctype html>"));
        assert_eq!(output.body_len, 15);
        assert_eq!(output.kind, Some(ResponseKind::Basic));
        assert_eq!(output.body, general_purpose::STANDARD.encode("<!doctype html>"));
        assert_eq!(output.body_sha256.map(|d| d.len()), Some(64));
    }

    #[tokio::test]
    async fn test_fetch_binary_icon_is_byte_identical() {
        let worker = worker_with(StaticNetwork::shell()).await;
        worker.run_lifecycle().await.unwrap();

        let png = vec![0x89u8, b'P', b'N', b'G', 0x0d, 0x0a];
        let icon = ResponseSnapshot::new(200, png.clone()).with_header("Content-Type", "image/png");
        worker
            .storage()
            .cache(worker.cache_name())
            .put("/icons/pwa-192x192.png", &icon)
            .await
            .unwrap();

        let output: SwFetchOutput =
            parse_output(fetch_impl(&worker, params("https://app.example/icons/pwa-192x192.png")).await.unwrap());
        assert!(output.intercepted);
        assert_eq!(output.route, "static_asset");
        assert_eq!(output.content_type.as_deref(), Some("image/png"));
        assert_eq!(output.body_text, None);
        assert_eq!(output.body_len, 6);
        assert_eq!(general_purpose::STANDARD.decode(&output.body).unwrap(), png);
    }

    #[tokio::test]
    async fn test_fetch_static_asset_offline_miss_is_error() {
        let worker = worker_with(StaticNetwork::shell()).await;
        worker.run_lifecycle().await.unwrap();

        let result = fetch_impl(&worker, params("https://app.example/assets/missing.js")).await;
        assert!(result.is_err());
    }
}
