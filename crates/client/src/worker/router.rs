//! Request classification and dispatch.

use reqwest::Method;

use super::ServiceWorker;
use crate::fetch::{FetchRequest, Fetcher, RequestMode};
use shellcache_core::{Error, ResponseSnapshot};

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; the page talks to the network directly.
    Passthrough,
    /// Page navigation, answered with the app shell document.
    Navigation,
    /// Build output served cache-first.
    StaticAsset,
}

impl<F: Fetcher> ServiceWorker<F> {
    /// Decide how `request` would be served, ignoring whether the worker
    /// currently controls pages.
    pub fn classify(&self, request: &FetchRequest) -> Route {
        if request.method != Method::GET {
            return Route::Passthrough;
        }
        if !self.scope.is_same_origin(&request.url) {
            return Route::Passthrough;
        }
        if request.mode == RequestMode::Navigate || request.accept().contains("text/html") {
            return Route::Navigation;
        }

        let path = request.url.path();
        if path == self.web_manifest || self.static_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return Route::StaticAsset;
        }

        Route::Passthrough
    }

    /// Intercept a page request.
    ///
    /// Returns `None` when the request is left to the network, either because
    /// the worker does not control pages yet or because the route is
    /// passthrough.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<Result<ResponseSnapshot, Error>> {
        if !self.controls_clients() {
            return None;
        }

        match self.classify(request) {
            Route::Passthrough => None,
            Route::Navigation => Some(Ok(self.app_shell_navigate().await)),
            Route::StaticAsset => Some(self.cache_first(request).await),
        }
    }
}
