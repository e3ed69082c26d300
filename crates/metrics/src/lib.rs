//! Metrics collection and export for warelay.
//!
//! Uses the `metrics` crate facade; callers record through the re-exported
//! macros and the names in this crate. With the `prometheus` feature the
//! recorder is served over HTTP for scraping, otherwise metrics are discarded.
//!
//! ```rust,ignore
//! use warelay_metrics::{counter, inbound};
//!
//! counter!(inbound::RECEIVED_TOTAL).increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
