//! Client code for shellcache.
//!
//! This crate provides the network fetch pipeline, precache manifest loading,
//! and the offline worker (lifecycle, routing and serving strategies) driven by
//! the server.

pub mod fetch;
pub mod manifest;
pub mod worker;

pub use fetch::{CacheMode, FetchConfig, FetchRequest, Fetcher, HttpFetcher, RequestMode, Scope, UrlError};
pub use manifest::{PrecacheManifest, merge_precache};
pub use reqwest::Method;
pub use worker::{
    ActivateReport, InstallReport, LifecycleReport, LifecycleState, PrecacheFailure, Route, ServiceWorker, WorkerMessage,
    WorkerStatus,
};
