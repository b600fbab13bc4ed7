//! The offline worker: lifecycle controller, request router and serving
//! strategies over one cache storage and one network.
//!
//! ### Lifecycle
//! - `install` precaches core assets and the build manifest into the cache
//!   named after the running version.
//! - `activate` prunes older cache generations and claims open pages.
//! - Activation waits for the skip-waiting latch, raised by `install` itself
//!   when `eager_activation` is on, or by a `SKIP_WAITING` message.
//!
//! ### Serving
//! - Navigations always get the app shell document.
//! - Static assets are served cache-first.
//! - Everything else goes to the network untouched.

pub mod lifecycle;
pub mod router;
pub mod strategies;

pub use lifecycle::{
    ActivateReport, GenerationPlan, InstallReport, LifecycleEvent, LifecycleReport, LifecycleState, PrecacheFailure,
    plan_generations,
};
pub use router::Route;
pub use strategies::Step;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, watch};
use url::Url;

use crate::fetch::{Fetcher, Scope};
use crate::manifest::PrecacheManifest;
use shellcache_core::{AppConfig, CacheStorage, Error};

/// Messages a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate without waiting for existing pages to close.
    SkipWaiting,
}

/// Snapshot of the worker for hosts and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: LifecycleState,
    pub version: String,
    pub cache_name: String,
    pub controls_clients: bool,
    pub skip_waiting: bool,
    pub caches: Vec<String>,
    pub last_install: Option<InstallReport>,
}

/// Offline worker bound to one deployment version.
pub struct ServiceWorker<F> {
    config: AppConfig,
    scope: Scope,
    cache_name: String,
    core_assets: Vec<String>,
    static_prefixes: Vec<String>,
    web_manifest: String,
    shell_key: String,
    shell_url: Url,
    manifest: PrecacheManifest,
    storage: CacheStorage,
    fetcher: F,
    state: watch::Sender<LifecycleState>,
    skip_waiting: watch::Sender<bool>,
    clients_claimed: AtomicBool,
    last_install: RwLock<Option<InstallReport>>,
}

impl<F: Fetcher> ServiceWorker<F> {
    /// Create a worker for the version named in `config`.
    ///
    /// Scope-relative paths in the configuration are resolved once here.
    pub fn new(config: AppConfig, storage: CacheStorage, fetcher: F) -> Result<Self, Error> {
        let scope = Scope::new(&config.origin, &config.scope)?;

        let core_assets = config
            .core_assets
            .iter()
            .map(|asset| scope.join_base(asset))
            .collect::<Result<Vec<_>, _>>()?;
        let static_prefixes = config
            .static_prefixes
            .iter()
            .map(|prefix| scope.join_base(prefix))
            .collect::<Result<Vec<_>, _>>()?;
        let web_manifest = scope.join_base(&config.web_manifest)?;
        let shell_url = scope.scoped_url(&config.shell_document)?;
        let shell_key = Scope::key_for(&shell_url);
        let manifest = PrecacheManifest::new(scope.scoped_url(&config.precache_manifest)?);

        let (state, _) = watch::channel(LifecycleState::Parsed);
        let (skip_waiting, _) = watch::channel(false);

        Ok(Self {
            cache_name: config.cache_name(),
            config,
            scope,
            core_assets,
            static_prefixes,
            web_manifest,
            shell_key,
            shell_url,
            manifest,
            storage,
            fetcher,
            state,
            skip_waiting,
            clients_claimed: AtomicBool::new(false),
            last_install: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Name of the cache owned by the running version.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Normalized keys of the core assets, in configured order.
    pub fn core_assets(&self) -> &[String] {
        &self.core_assets
    }

    /// Cache key of the app shell document.
    pub fn shell_key(&self) -> &str {
        &self.shell_key
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Whether the worker has claimed open pages and intercepts their requests.
    pub fn controls_clients(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    /// Deliver a message posted by a page.
    ///
    /// Returns whether the message was recognized. Unknown messages are ignored.
    pub fn handle_message(&self, message: &Value) -> bool {
        match serde_json::from_value::<WorkerMessage>(message.clone()) {
            Ok(WorkerMessage::SkipWaiting) => {
                self.skip_waiting();
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unrecognized message");
                false
            }
        }
    }

    /// Current status, including every cache name in storage.
    pub async fn status(&self) -> Result<WorkerStatus, Error> {
        let caches = self.storage.keys().await?;
        let last_install = self.last_install.read().await.clone();

        Ok(WorkerStatus {
            state: self.state(),
            version: self.config.cache_version().to_string(),
            cache_name: self.cache_name.clone(),
            controls_clients: self.controls_clients(),
            skip_waiting: self.skip_waiting_requested(),
            caches,
            last_install,
        })
    }
}
