//! Supervisor: wires the WhatsApp connection to the inbound pipeline.
//!
//! Lifecycle:
//! 1. Build filter, sinks and dispatcher from config
//! 2. Load the persisted session
//! 3. Optionally start the Baileys sidecar
//! 4. Run the connection manager and the single consumer loop
//! 5. On shutdown, drain queued events and in-flight webhooks
//!
//! Domain logic lives in `warelay-whatsapp` and `warelay-channels`.

pub mod error;
pub mod pipeline;
pub mod supervisor;

pub use {
    error::{Error, Result},
    pipeline::{Pipeline, PipelineStats, Processed, StatsSnapshot},
    supervisor::{Supervisor, SupervisorExit, SupervisorOptions},
};
