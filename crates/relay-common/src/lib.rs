//! ---
//! ra_section: "01-core-functionality"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Shared primitives and utilities for the admin runtime."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! Core shared primitives for the relay admin workspace.
//! This crate exposes configuration loading, logging, version labels and the
//! key-value store consumed by the update orchestrator and the API.

pub mod config;
pub mod logging;
pub mod store;
pub mod version;

pub use config::{
    ApiConfig, AppConfig, LdapConfig, LifecycleConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, OemConfig, UpdateConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use version::{read_version_label, VersionInfo};
