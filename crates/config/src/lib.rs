//! Configuration loading, env substitution, env overrides and validation.
//!
//! Config files: `warelay.toml`, `warelay.yaml`, or `warelay.json`
//! Searched in `./` then `~/.config/warelay/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file text.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config, load_or_discover,
    },
    schema::{
        FilterConfig, MetricsConfig, PairMode, PipelineConfig, ReconnectConfig, RelayConfig,
        SessionConfig, SidecarConfig, StoreConfig, TransportConfig, WebhookConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
