//! `overseer-core` — shared configuration and error types.
//!
//! Every other crate in the workspace depends on this one; it must stay
//! free of heavyweight dependencies (no tokio, no HTTP stack).

pub mod config;
pub mod error;

pub use config::OverseerConfig;
pub use error::{OverseerError, Result};
