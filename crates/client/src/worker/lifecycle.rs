//! Install and activate phases as an explicit state machine.
//!
//! ```text
//! Parsed --InstallStarted--> Installing --InstallFinished--> Waiting
//! Waiting --ActivateStarted--> Activating --ActivateFinished--> Active
//! Installing|Activating --Failed--> Redundant
//! ```

use std::fmt;
use std::sync::atomic::Ordering;

use futures_util::future::join_all;
use serde::Serialize;

use super::ServiceWorker;
use crate::fetch::{CacheMode, FetchRequest, Fetcher};
use crate::manifest::merge_precache;
use shellcache_core::{Cache, Error};

/// Where the worker is in its deployment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, nothing installed yet.
    Parsed,
    Installing,
    /// Installed; activation waits for the skip-waiting signal.
    Waiting,
    Activating,
    /// Controls pages and serves their requests.
    Active,
    /// Install or activation failed; this worker will not serve.
    Redundant,
}

/// Named transitions between lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    InstallStarted,
    InstallFinished,
    ActivateStarted,
    ActivateFinished,
    Failed,
}

impl LifecycleState {
    /// The state reached by applying `event`, or None if the event is not
    /// accepted in this state.
    pub fn on(self, event: LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self, event) {
            (Parsed, InstallStarted) => Some(Installing),
            (Installing, InstallFinished) => Some(Waiting),
            (Waiting, ActivateStarted) => Some(Activating),
            (Activating, ActivateFinished) => Some(Active),
            (Installing | Activating, Failed) => Some(Redundant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::InstallStarted => "install",
            LifecycleEvent::InstallFinished => "finish install",
            LifecycleEvent::ActivateStarted => "activate",
            LifecycleEvent::ActivateFinished => "finish activation",
            LifecycleEvent::Failed => "fail",
        };
        f.write_str(name)
    }
}

/// An asset that could not be precached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecacheFailure {
    pub key: String,
    pub reason: String,
}

/// Outcome of the install phase.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub cache_name: String,
    /// Merged precache set: core assets, then manifest-only additions.
    pub precache_set: Vec<String>,
    /// Keys present in the cache once install settled.
    pub cached: Vec<String>,
    /// Failures from both precache passes, in the order they were attempted.
    pub failures: Vec<PrecacheFailure>,
    pub installed_at: String,
}

/// Outcome of the activate phase.
#[derive(Debug, Clone, Serialize)]
pub struct ActivateReport {
    pub retained: Vec<String>,
    pub deleted: Vec<String>,
    pub clients_claimed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub install: InstallReport,
    pub activate: ActivateReport,
}

/// Which owned caches survive activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPlan {
    pub retained: Vec<String>,
    pub stale: Vec<String>,
}

/// Split the caches in `names` (oldest first) into retained and stale.
///
/// Only names accepted by `is_owned` are considered; everything else is left
/// out of both lists. The newest `max_generations` owned caches are kept, and
/// `current` is always kept. When `current` falls outside that window it takes
/// the slot of the oldest cache inside it, so no more than `max_generations`
/// owned caches remain.
pub fn plan_generations(
    names: &[String], is_owned: impl Fn(&str) -> bool, current: &str, max_generations: usize,
) -> GenerationPlan {
    let owned: Vec<&String> = names.iter().filter(|name| is_owned(name)).collect();

    let window = |size: usize| owned.len().saturating_sub(size);
    let current_at = owned.iter().position(|name| name.as_str() == current);
    let start = match current_at {
        Some(pos) if pos < window(max_generations) => window(max_generations.saturating_sub(1)),
        _ => window(max_generations),
    };

    let mut plan = GenerationPlan { retained: Vec::new(), stale: Vec::new() };
    for (pos, name) in owned.into_iter().enumerate() {
        if pos >= start || Some(pos) == current_at {
            plan.retained.push(name.clone());
        } else {
            plan.stale.push(name.clone());
        }
    }
    plan
}

impl<F: Fetcher> ServiceWorker<F> {
    /// Raise the skip-waiting latch. Safe to call at any time; a signal sent
    /// before activation is waited on is not lost.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.send_replace(true) {
            tracing::info!(cache = %self.cache_name, "skip waiting requested");
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        *self.skip_waiting.borrow()
    }

    /// Resolve once the skip-waiting latch is raised.
    pub async fn wait_for_skip_waiting(&self) {
        let mut rx = self.skip_waiting.subscribe();
        let raised = rx.wait_for(|skip| *skip).await.is_ok();
        if !raised {
            tracing::warn!("skip waiting channel closed");
        }
    }

    fn advance(&self, event: LifecycleEvent) -> Result<(), Error> {
        let mut rejected = None;
        self.state.send_if_modified(|state| match state.on(event) {
            Some(next) => {
                tracing::info!(from = %state, to = %next, cache = %self.cache_name, "lifecycle transition");
                *state = next;
                true
            }
            None => {
                rejected = Some(*state);
                false
            }
        });

        match rejected {
            Some(state) => Err(Error::InvalidTransition { state: state.to_string(), event: event.to_string() }),
            None => Ok(()),
        }
    }

    fn fail(&self, err: Error) -> Error {
        if let Err(e) = self.advance(LifecycleEvent::Failed) {
            tracing::warn!(error = %e, "could not mark worker redundant");
        }
        err
    }

    /// Install phase: precache core assets and the manifest into the current
    /// cache.
    ///
    /// Individual asset failures are collected in the report and never fail
    /// the install. Only storage failures that prevent opening or reading the
    /// cache do.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.advance(LifecycleEvent::InstallStarted)?;

        let report = match self.precache_all().await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(e)),
        };

        if !report.failures.is_empty() {
            tracing::warn!(
                count = report.failures.len(),
                failures = ?report.failures,
                "install: some assets failed to cache"
            );
        }

        *self.last_install.write().await = Some(report.clone());

        if self.config.eager_activation {
            self.skip_waiting();
        }
        self.advance(LifecycleEvent::InstallFinished)?;

        Ok(report)
    }

    async fn precache_all(&self) -> Result<InstallReport, Error> {
        let cache = self.storage.open_cache(&self.cache_name).await?;

        let mut failures = collect_failures(self.precache(&cache, &self.core_assets).await);

        let manifest = self.manifest.load(&self.fetcher, &self.scope).await;
        let precache_set = merge_precache(&self.core_assets, &manifest);
        tracing::debug!(
            core = self.core_assets.len(),
            manifest = manifest.len(),
            merged = precache_set.len(),
            "precache set resolved"
        );

        failures.extend(collect_failures(self.precache(&cache, &precache_set).await));

        Ok(InstallReport {
            cache_name: self.cache_name.clone(),
            precache_set,
            cached: cache.keys().await?,
            failures,
            installed_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Fetch and store every key concurrently. Each outcome settles on its own.
    async fn precache(&self, cache: &Cache, keys: &[String]) -> Vec<Result<(), PrecacheFailure>> {
        join_all(keys.iter().map(|key| self.cache_one(cache, key))).await
    }

    async fn cache_one(&self, cache: &Cache, key: &str) -> Result<(), PrecacheFailure> {
        let failed = |reason: String| PrecacheFailure { key: key.to_string(), reason };

        let url = self.scope.resolve(key).map_err(|e| failed(e.to_string()))?;
        let request = FetchRequest::get(url).with_cache(CacheMode::Reload);
        let response = self.fetcher.fetch(&request).await.map_err(|e| failed(e.to_string()))?;

        if !response.is_cacheable() {
            return Err(failed(format!("bad response: {}", response.status)));
        }

        cache.put(key, &response).await.map_err(|e| failed(e.to_string()))?;
        Ok(())
    }

    /// Activate phase: prune stale generations and claim open pages.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        self.advance(LifecycleEvent::ActivateStarted)?;

        let report = match self.prune_generations().await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(e)),
        };

        self.clients_claimed.store(true, Ordering::SeqCst);
        self.advance(LifecycleEvent::ActivateFinished)?;

        Ok(ActivateReport { clients_claimed: true, ..report })
    }

    async fn prune_generations(&self) -> Result<ActivateReport, Error> {
        let names = self.storage.keys().await?;
        let plan = plan_generations(
            &names,
            |name| self.config.owns_cache(name),
            &self.cache_name,
            self.config.max_cache_generations,
        );

        let outcomes = join_all(plan.stale.iter().map(|name| async move {
            let outcome = self.storage.delete_cache(name).await;
            (name, outcome)
        }))
        .await;

        let mut retained = plan.retained;
        let mut deleted = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(_) => deleted.push(name.clone()),
                Err(e) => {
                    tracing::warn!(cache = %name, error = %e, "failed to delete stale cache");
                    retained.push(name.clone());
                }
            }
        }

        if !deleted.is_empty() {
            tracing::info!(deleted = ?deleted, "pruned stale cache generations");
        }

        Ok(ActivateReport { retained, deleted, clients_claimed: false })
    }

    /// Drive one deployment: install, wait for the skip-waiting signal, then
    /// activate.
    pub async fn run_lifecycle(&self) -> Result<LifecycleReport, Error> {
        let install = self.install().await?;

        if !self.skip_waiting_requested() {
            tracing::info!(cache = %self.cache_name, "installed; waiting for SKIP_WAITING");
        }
        self.wait_for_skip_waiting().await;

        let activate = self.activate().await?;
        Ok(LifecycleReport { install, activate })
    }
}

fn collect_failures(outcomes: Vec<Result<(), PrecacheFailure>>) -> Vec<PrecacheFailure> {
    outcomes.into_iter().filter_map(Result::err).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::*;
    use shellcache_core::{AppConfig, ResponseSnapshot};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn owned(name: &str) -> bool {
        AppConfig::default().owns_cache(name)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_transitions() {
        use LifecycleEvent::*;
        use LifecycleState::*;

        assert_eq!(Parsed.on(InstallStarted), Some(Installing));
        assert_eq!(Installing.on(InstallFinished), Some(Waiting));
        assert_eq!(Waiting.on(ActivateStarted), Some(Activating));
        assert_eq!(Activating.on(ActivateFinished), Some(Active));
        assert_eq!(Installing.on(Failed), Some(Redundant));
        assert_eq!(Parsed.on(ActivateStarted), None);
        assert_eq!(Active.on(InstallStarted), None);
        assert_eq!(Waiting.on(Failed), None);
    }

    #[test]
    fn test_plan_keeps_newest_generations() {
        let all = names(&["app-shell-v1", "app-shell-v2", "app-shell-v3", "app-shell-v4", "app-shell-v5"]);
        let plan = plan_generations(&all, owned, "app-shell-v5", 3);
        assert_eq!(plan.retained, names(&["app-shell-v3", "app-shell-v4", "app-shell-v5"]));
        assert_eq!(plan.stale, names(&["app-shell-v1", "app-shell-v2"]));
    }

    #[test]
    fn test_plan_never_drops_current_even_when_oldest() {
        let all = names(&["app-shell-v1", "app-shell-v2", "app-shell-v3", "app-shell-v4", "app-shell-v5"]);
        let plan = plan_generations(&all, owned, "app-shell-v1", 3);
        assert_eq!(plan.retained, names(&["app-shell-v1", "app-shell-v4", "app-shell-v5"]));
        assert_eq!(plan.stale, names(&["app-shell-v2", "app-shell-v3"]));
    }

    #[test]
    fn test_plan_single_generation() {
        let all = names(&["app-shell-v1", "app-shell-v2"]);
        let plan = plan_generations(&all, owned, "app-shell-v1", 1);
        assert_eq!(plan.retained, names(&["app-shell-v1"]));
        assert_eq!(plan.stale, names(&["app-shell-v2"]));
    }

    #[test]
    fn test_plan_ignores_foreign_caches() {
        let all = names(&["user-uploads", "app-shell-v1", "app-shell-v2", "thumbnails", "app-shell-v3"]);
        let plan = plan_generations(&all, owned, "app-shell-v3", 1);
        assert_eq!(plan.retained, names(&["app-shell-v3"]));
        assert_eq!(plan.stale, names(&["app-shell-v1", "app-shell-v2"]));
    }

    #[test]
    fn test_plan_under_limit() {
        let all = names(&["app-shell-v1"]);
        let plan = plan_generations(&all, owned, "app-shell-v1", 3);
        assert_eq!(plan.retained, all);
        assert!(plan.stale.is_empty());
    }

    #[tokio::test]
    async fn test_install_precaches_core_and_manifest() {
        let net = deployed_network(r#"["assets/app-1a2b.js", "/assets/app-1a2b.css", "index.html"]"#)
            .route("/assets/app-1a2b.js", ResponseSnapshot::new(200, "js"))
            .route("/assets/app-1a2b.css", ResponseSnapshot::new(200, "css"));
        let worker = worker_with(test_config("v1"), net).await;

        let report = worker.install().await.unwrap();

        assert_eq!(worker.state(), LifecycleState::Waiting);
        assert!(report.failures.is_empty());
        assert_eq!(report.precache_set.len(), 8);
        assert_eq!(report.precache_set[0], "/index.html");
        assert_eq!(report.precache_set[6], "/assets/app-1a2b.js");
        assert_eq!(report.cached.len(), 8);

        let cache = worker.storage().cache("app-shell-v1");
        let hit = cache.match_key("/assets/app-1a2b.css").await.unwrap().unwrap();
        assert_eq!(hit.body, b"css");
    }

    #[tokio::test]
    async fn test_install_forces_revalidation() {
        let worker = worker_with(test_config("v1"), deployed_network("[]")).await;
        worker.install().await.unwrap();

        let requests = worker.fetcher.requests();
        let asset_requests: Vec<_> = requests
            .iter()
            .filter(|r| r.url.path() != "/precache.json")
            .collect();
        assert!(!asset_requests.is_empty());
        assert!(asset_requests.iter().all(|r| r.cache == CacheMode::Reload));
        // core assets are fetched once per pass
        assert_eq!(worker.fetcher.calls_to("/index.html"), 2);
    }

    #[tokio::test]
    async fn test_install_tolerates_asset_failures() {
        let net = deployed_network(r#"["assets/gone.js", "assets/reset.js", "assets/ok.js"]"#)
            .route("/vite.svg", ResponseSnapshot::new(500, "boom"))
            .broken("/assets/reset.js")
            .route("/assets/ok.js", ResponseSnapshot::new(200, "ok"));
        let worker = worker_with(test_config("v1"), net).await;

        let report = worker.install().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Waiting);

        let failed: HashSet<&str> = report.failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, HashSet::from(["/vite.svg", "/assets/gone.js", "/assets/reset.js"]));
        // core asset failures are reported once per pass
        assert_eq!(report.failures.iter().filter(|f| f.key == "/vite.svg").count(), 2);
        assert!(report.failures.iter().any(|f| f.reason == "bad response: 500"));
        assert!(report.cached.contains(&"/assets/ok.js".to_string()));

        // every core asset is either cached or reported
        for key in worker.core_assets() {
            assert!(report.cached.contains(key) || failed.contains(key.as_str()), "{key} silently missing");
        }
    }

    #[tokio::test]
    async fn test_install_offline_still_completes() {
        let net = deployed_network("[]");
        net.set_offline(true);
        let worker = worker_with(test_config("v1"), net).await;

        let report = worker.install().await.unwrap();
        assert!(report.cached.is_empty());
        assert_eq!(report.failures.len(), 12);
        assert_eq!(worker.state(), LifecycleState::Waiting);
        assert!(worker.storage().has_cache("app-shell-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_twice_is_rejected() {
        let worker = worker_with(test_config("v1"), deployed_network("[]")).await;
        worker.install().await.unwrap();

        let result = worker.install().await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_install_records_last_report() {
        let worker = worker_with(test_config("v1"), deployed_network("[]")).await;
        worker.install().await.unwrap();

        let status = worker.status().await.unwrap();
        assert_eq!(status.last_install.unwrap().cache_name, "app-shell-v1");
        assert!(status.skip_waiting);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let worker = worker_with(test_config("v1"), deployed_network("[]")).await;
        let result = worker.activate().await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(worker.state(), LifecycleState::Parsed);
    }

    #[tokio::test]
    async fn test_activate_prunes_old_generations() {
        let worker = worker_with(test_config("v5"), deployed_network("[]")).await;
        let storage = worker.storage().clone();
        for name in ["app-shell-v1", "user-uploads", "app-shell-v2", "app-shell-v3", "app-shell-v4"] {
            storage.open_cache(name).await.unwrap();
        }

        let report = worker.run_lifecycle().await.unwrap();

        assert_eq!(report.activate.deleted.len(), 2);
        assert!(report.activate.clients_claimed);
        assert_eq!(worker.state(), LifecycleState::Active);
        assert!(worker.controls_clients());

        let remaining = storage.keys().await.unwrap();
        assert_eq!(remaining, names(&["user-uploads", "app-shell-v3", "app-shell-v4", "app-shell-v5"]));

        let owned: Vec<_> = remaining.iter().filter(|n| n.starts_with("app-shell-")).collect();
        assert!(owned.len() <= 3);
    }

    #[tokio::test]
    async fn test_activate_keeps_current_when_oldest() {
        let config = AppConfig { max_cache_generations: 2, ..test_config("v1") };
        let worker = worker_with(config, deployed_network("[]")).await;
        let storage = worker.storage().clone();
        for name in ["app-shell-v1", "app-shell-v2", "app-shell-v3", "app-shell-v4"] {
            storage.open_cache(name).await.unwrap();
        }

        worker.run_lifecycle().await.unwrap();

        let remaining = storage.keys().await.unwrap();
        assert_eq!(remaining, names(&["app-shell-v1", "app-shell-v4"]));
    }

    #[tokio::test]
    async fn test_activate_never_deletes_foreign_caches() {
        let config = AppConfig { max_cache_generations: 1, ..test_config("v2") };
        let worker = worker_with(config, deployed_network("[]")).await;
        let storage = worker.storage().clone();
        for name in ["thumbnails", "app-shell-v1", "workbox-precache", "app-shellv0"] {
            storage.open_cache(name).await.unwrap();
        }

        let report = worker.run_lifecycle().await.unwrap();

        assert_eq!(report.activate.deleted, names(&["app-shell-v1"]));
        let remaining = storage.keys().await.unwrap();
        assert_eq!(remaining, names(&["thumbnails", "workbox-precache", "app-shellv0", "app-shell-v2"]));
    }

    #[tokio::test]
    async fn test_lifecycle_waits_for_skip_waiting_message() {
        let config = AppConfig { eager_activation: false, ..test_config("v1") };
        let worker = Arc::new(worker_with(config, deployed_network("[]")).await);

        let task = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run_lifecycle().await }
        });

        let mut states = worker.subscribe();
        states
            .wait_for(|state| *state == LifecycleState::Waiting)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.state(), LifecycleState::Waiting);
        assert!(!worker.controls_clients());

        assert!(worker.handle_message(&serde_json::json!({"type": "SKIP_WAITING"})));

        let report = task.await.unwrap().unwrap();
        assert!(report.activate.clients_claimed);
        assert_eq!(worker.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_skip_waiting_before_install_is_latched() {
        let config = AppConfig { eager_activation: false, ..test_config("v1") };
        let worker = worker_with(config, deployed_network("[]")).await;

        worker.skip_waiting();
        let report = tokio::time::timeout(Duration::from_secs(5), worker.run_lifecycle())
            .await
            .expect("lifecycle should not wait")
            .unwrap();
        assert!(report.activate.clients_claimed);
    }
}
