//! Precache manifest loading.
//!
//! The build emits a JSON array of asset paths next to the app. A missing or
//! malformed manifest only shrinks the precache set; it is never an error.

use std::collections::HashSet;

use serde_json::Value;
use url::Url;

use crate::fetch::{CacheMode, FetchRequest, Fetcher, Scope};

/// Location of the precache manifest.
#[derive(Debug, Clone)]
pub struct PrecacheManifest {
    url: Url,
}

impl PrecacheManifest {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the manifest, bypassing HTTP caches, and return normalized keys.
    ///
    /// Returns an empty list on any network, status, or shape failure.
    /// Non-string array elements are skipped.
    pub async fn load<F: Fetcher + ?Sized>(&self, fetcher: &F, scope: &Scope) -> Vec<String> {
        let request = FetchRequest::get(self.url.clone()).with_cache(CacheMode::NoStore);

        let response = match fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "precache manifest unavailable");
                return Vec::new();
            }
        };

        if !response.is_ok() {
            tracing::debug!(url = %self.url, status = response.status, "precache manifest not served");
            return Vec::new();
        }

        let entries = match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                tracing::debug!(url = %self.url, "precache manifest is not an array");
                return Vec::new();
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "precache manifest is not JSON");
                return Vec::new();
            }
        };

        entries
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|path| match scope.cache_key(path) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::debug!(path, error = %e, "skipping precache manifest entry");
                    None
                }
            })
            .collect()
    }
}

/// Ordered union of core assets and manifest entries.
///
/// Core assets come first; later duplicates are dropped.
pub fn merge_precache(core: &[String], manifest: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(core.len() + manifest.len());
    for key in core.iter().chain(manifest) {
        if seen.insert(key.as_str()) {
            merged.push(key.clone());
        }
    }
    merged
}
