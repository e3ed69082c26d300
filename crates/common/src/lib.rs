//! Helpers shared by all warelay crates.

pub mod error;
pub mod time;

pub use error::FromMessage;
