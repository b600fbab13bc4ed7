//! shellcache server entry point.
//!
//! Boots the offline worker, drives its install/activate lifecycle in the
//! background, and serves MCP on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use shellcache_client::{FetchConfig, HttpFetcher, ServiceWorker};
use shellcache_core::{AppConfig, CacheStorage};
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        origin = %config.origin,
        scope = %config.scope,
        cache = %config.cache_name(),
        db = %config.db_path.display(),
        "Starting shellcache server on stdio transport"
    );

    let storage = CacheStorage::open(&config.db_path).await?;
    let fetcher = HttpFetcher::new(FetchConfig::from(&config))?;
    let worker = Arc::new(ServiceWorker::new(config, storage, fetcher)?);

    tokio::spawn({
        let worker = worker.clone();
        async move {
            match worker.run_lifecycle().await {
                Ok(report) => tracing::info!(
                    cache = %report.install.cache_name,
                    failures = report.install.failures.len(),
                    deleted = ?report.activate.deleted,
                    "worker active"
                ),
                Err(e) => tracing::error!(error = %e, "worker lifecycle failed"),
            }
        }
    });

    let handler = handler::ShellCacheServer::new(worker);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
