//! Network fetch pipeline.
//!
//! ### Requests
//! - `FetchRequest` carries method, URL, request mode, cache mode and headers,
//!   mirroring what an intercepted page request exposes.
//! - Cache modes translate to request headers (`reload` revalidates,
//!   `no-store` asks intermediaries not to keep a copy).
//!
//! ### Responses
//! - Every HTTP status is returned as a `ResponseSnapshot`; deciding whether a
//!   status is usable is left to the caller.
//! - Transport failures become `Error::Network`.
//! - Max body bytes: 5MB (configurable)
//!
//! ### Stable Abstraction
//! - The `Fetcher` trait decouples the worker from the HTTP client so tests
//!   can substitute a scripted network.

pub mod url;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use std::time::{Duration, Instant};

pub use self::url::{Scope, UrlError};

use ::url::Url;
use shellcache_core::{AppConfig, Error, ResponseSnapshot};

/// Request mode as declared by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "navigate" => Some(RequestMode::Navigate),
            "same-origin" => Some(RequestMode::SameOrigin),
            "no-cors" => Some(RequestMode::NoCors),
            "cors" => Some(RequestMode::Cors),
            _ => None,
        }
    }
}

/// How the request interacts with HTTP caches between here and the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Revalidate with the origin, ignoring any intermediate copy.
    Reload,
    /// Fetch fresh and ask intermediaries not to store the response.
    NoStore,
}

/// A read request as seen by the worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub cache: CacheMode,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A plain `GET` for `url`.
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, mode: RequestMode::default(), cache: CacheMode::default(), headers: Vec::new() }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Accept` header, empty when absent.
    pub fn accept(&self) -> &str {
        self.header("accept").unwrap_or("")
    }
}

/// Network access used by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot, Error>;
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shellcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "shellcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// reqwest-backed `Fetcher`.
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot, Error> {
        let start = Instant::now();

        let mut builder = self.http.request(request.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.cache {
            CacheMode::Default => builder,
            CacheMode::Reload => builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache"),
            CacheMode::NoStore => builder
                .header(header::CACHE_CONTROL, "no-store")
                .header(header::PRAGMA, "no-cache"),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", request.url, e)))?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let headers = snapshot_headers(response.headers());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        tracing::debug!(
            "fetched {} -> {} in {}ms ({} bytes)",
            request.url,
            status.as_u16(),
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(ResponseSnapshot::new(status.as_u16(), bytes.to_vec()).with_headers(headers))
    }
}

/// Response headers in wire order.
///
/// Values that are not valid UTF-8 are kept with invalid bytes replaced by
/// U+FFFD, so a header is never missing from the snapshot.
fn snapshot_headers(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.as_str().to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "shellcache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "tripgrid-sw".into(), timeout_ms: 1500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "tripgrid-sw");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_request_builders() {
        let url = Url::parse("https://app.example/assets/app.js").unwrap();
        let request = FetchRequest::get(url)
            .with_mode(RequestMode::Navigate)
            .with_cache(CacheMode::NoStore)
            .with_header("Accept", "text/html,application/xhtml+xml");

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.mode, RequestMode::Navigate);
        assert_eq!(request.cache, CacheMode::NoStore);
        assert_eq!(request.accept(), "text/html,application/xhtml+xml");
    }

    #[test]
    fn test_accept_defaults_empty() {
        let request = FetchRequest::get(Url::parse("https://app.example/").unwrap());
        assert_eq!(request.accept(), "");
    }

    #[test]
    fn test_request_mode_parse() {
        assert_eq!(RequestMode::parse("navigate"), Some(RequestMode::Navigate));
        assert_eq!(RequestMode::parse("no-cors"), Some(RequestMode::NoCors));
        assert_eq!(RequestMode::parse("websocket"), None);
    }

    #[test]
    fn test_snapshot_headers_keeps_non_utf8_values() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("image/png"));
        headers.insert(
            header::CONTENT_DISPOSITION,
            header::HeaderValue::from_bytes(b"inline; filename=\"caf\xe9.png\"").unwrap(),
        );

        let snapshot = snapshot_headers(&headers);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&("content-type".to_string(), "image/png".to_string())));
        assert!(snapshot.contains(&("content-disposition".to_string(), "inline; filename=\"caf\u{fffd}.png\"".to_string())));
    }

    #[tokio::test]
    async fn test_http_fetcher_new() {
        let fetcher = HttpFetcher::new(FetchConfig::default());
        assert!(fetcher.is_ok());
    }
}
