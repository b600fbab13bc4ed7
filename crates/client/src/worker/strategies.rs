//! Serving strategies as ordered resolution plans.
//!
//! A plan is a list of steps tried in order. Each step either produces a
//! response or lets the next step run; a plan that runs out of steps ends in
//! the last error seen.

use std::ops::ControlFlow;

use super::ServiceWorker;
use crate::fetch::{CacheMode, FetchRequest, Fetcher, Scope};
use shellcache_core::{Error, ResponseSnapshot};

/// One step of a resolution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Look the key up in the current cache.
    CacheLookup,
    /// Fetch from the network, storing cacheable responses.
    Network,
    /// Synthesize the offline response.
    OfflineFallback,
}

/// Cache, then network. The second lookup picks up a copy written by a
/// concurrent request when the network is down.
pub const CACHE_FIRST: &[Step] = &[Step::CacheLookup, Step::Network, Step::CacheLookup];

/// Cached shell, then network, then the offline notice.
pub const APP_SHELL: &[Step] = &[Step::CacheLookup, Step::Network, Step::OfflineFallback];

impl<F: Fetcher> ServiceWorker<F> {
    /// Serve a static asset cache-first.
    ///
    /// A network response is returned whatever its status; only cacheable
    /// ones are stored. Fails with the network error when there is no cached
    /// copy to fall back to.
    pub async fn cache_first(&self, request: &FetchRequest) -> Result<ResponseSnapshot, Error> {
        let key = Scope::key_for(&request.url);
        self.resolve(CACHE_FIRST, &key, request).await
    }

    /// Serve the app shell document for any navigation.
    ///
    /// Always yields a response: the cached shell, a fresh copy, or a 503
    /// offline notice.
    pub async fn app_shell_navigate(&self) -> ResponseSnapshot {
        let request = FetchRequest::get(self.shell_url.clone()).with_cache(CacheMode::NoStore);
        match self.resolve(APP_SHELL, &self.shell_key, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "app shell unavailable");
                self.offline_response()
            }
        }
    }

    /// The response served for navigations while offline with a cold cache.
    pub fn offline_response(&self) -> ResponseSnapshot {
        let body = format!(
            "Offline: {} is not cached yet. Open once online to prime the cache.",
            self.config.shell_document
        );
        ResponseSnapshot::new(503, body).with_header("Content-Type", "text/plain; charset=utf-8")
    }

    async fn resolve(&self, plan: &[Step], key: &str, request: &FetchRequest) -> Result<ResponseSnapshot, Error> {
        let mut last_error = None;

        for step in plan {
            match self.run_step(*step, key, request).await {
                ControlFlow::Break(response) => return Ok(response),
                ControlFlow::Continue(Some(e)) => last_error = Some(e),
                ControlFlow::Continue(None) => {}
            }
        }

        Err(last_error.unwrap_or_else(|| Error::CacheMiss(key.to_string())))
    }

    async fn run_step(&self, step: Step, key: &str, request: &FetchRequest) -> ControlFlow<ResponseSnapshot, Option<Error>> {
        match step {
            Step::CacheLookup => match self.lookup(key).await {
                Some(response) => ControlFlow::Break(response),
                None => ControlFlow::Continue(None),
            },
            Step::Network => match self.fetcher.fetch(request).await {
                Ok(response) => {
                    self.store(key, &response).await;
                    ControlFlow::Break(response)
                }
                Err(e) => {
                    tracing::debug!(key, error = %e, "network fetch failed");
                    ControlFlow::Continue(Some(e))
                }
            },
            Step::OfflineFallback => ControlFlow::Break(self.offline_response()),
        }
    }

    /// Cache lookup. Storage errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<ResponseSnapshot> {
        match self.storage.cache(&self.cache_name).match_key(key).await {
            Ok(Some(response)) => {
                tracing::debug!(key, cache = %self.cache_name, "cache hit");
                Some(response)
            }
            Ok(None) => {
                tracing::debug!(key, cache = %self.cache_name, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key, cache = %self.cache_name, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Write-through after a network fetch. Error responses are skipped by the
    /// cache itself; write failures never fail the request.
    async fn store(&self, key: &str, response: &ResponseSnapshot) {
        if let Err(e) = self.storage.cache(&self.cache_name).put(key, response).await {
            tracing::warn!(key, cache = %self.cache_name, error = %e, "cache write failed");
        }
    }
}
