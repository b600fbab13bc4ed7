//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SHELLCACHE_*)
//! 2. TOML config file (if SHELLCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Version used when the build did not inject one.
pub const DEV_VERSION: &str = "dev";

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SHELLCACHE_*)
/// 2. TOML config file (if SHELLCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache storage database.
    ///
    /// Set via SHELLCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin of the application the worker serves, e.g. `https://app.example`.
    ///
    /// Set via SHELLCACHE_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Registration scope, relative to the origin. Asset paths resolve against it.
    ///
    /// Set via SHELLCACHE_SCOPE environment variable.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Deployment identifier injected by the build.
    ///
    /// Set via SHELLCACHE_VERSION environment variable.
    #[serde(default)]
    pub version: Option<String>,

    /// Prefix shared by every cache this worker owns.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Number of prefixed caches that survive activation.
    #[serde(default = "default_max_cache_generations")]
    pub max_cache_generations: usize,

    /// Scope-relative assets precached on every install.
    #[serde(default = "default_core_assets")]
    pub core_assets: Vec<String>,

    /// Scope-relative path of the JSON precache manifest.
    #[serde(default = "default_precache_manifest")]
    pub precache_manifest: String,

    /// Scope-relative path prefixes served cache-first.
    #[serde(default = "default_static_prefixes")]
    pub static_prefixes: Vec<String>,

    /// Scope-relative path of the web app manifest, also served cache-first.
    #[serde(default = "default_web_manifest")]
    pub web_manifest: String,

    /// Scope-relative path of the app shell document served for navigations.
    #[serde(default = "default_shell_document")]
    pub shell_document: String,

    /// Activate as soon as install finishes instead of waiting for a
    /// `SKIP_WAITING` message.
    #[serde(default = "default_true")]
    pub eager_activation: bool,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via SHELLCACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via SHELLCACHE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via SHELLCACHE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shellcache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:4173".into()
}

fn default_scope() -> String {
    "/".into()
}

fn default_cache_prefix() -> String {
    "app-shell-".into()
}

fn default_max_cache_generations() -> usize {
    3
}

fn default_core_assets() -> Vec<String> {
    [
        "index.html",
        "manifest.webmanifest",
        "vite.svg",
        "icons/pwa-192x192.png",
        "icons/pwa-512x512.png",
        "icons/pwa-maskable-512x512.png",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_precache_manifest() -> String {
    "precache.json".into()
}

fn default_static_prefixes() -> Vec<String> {
    vec!["assets/".into(), "icons/".into()]
}

fn default_web_manifest() -> String {
    "manifest.webmanifest".into()
}

fn default_shell_document() -> String {
    "index.html".into()
}

fn default_user_agent() -> String {
    "shellcache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            scope: default_scope(),
            version: None,
            cache_prefix: default_cache_prefix(),
            max_cache_generations: default_max_cache_generations(),
            core_assets: default_core_assets(),
            precache_manifest: default_precache_manifest(),
            static_prefixes: default_static_prefixes(),
            web_manifest: default_web_manifest(),
            shell_document: default_shell_document(),
            eager_activation: true,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The running deployment version, `dev` when absent or blank.
    pub fn cache_version(&self) -> &str {
        match self.version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => DEV_VERSION,
        }
    }

    /// Name of the cache owned by the running version.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.cache_version())
    }

    /// Whether a cache name belongs to this worker.
    pub fn owns_cache(&self, name: &str) -> bool {
        name.starts_with(&self.cache_prefix)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SHELLCACHE_`
    /// 2. TOML file from `SHELLCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SHELLCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SHELLCACHE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
