//! Error handling for the dev session.
//!
//! [`DevError`] is the top-level error of this crate. Failures from the bus
//! and the build engine convert into it automatically, so session code can
//! use `?` across crate boundaries.
//!
//! Not every error ends the session: a failed build, a malformed envelope or
//! an unknown event kind are logged and skipped by the loops that hit them.

use std::path::PathBuf;
use thiserror::Error;

mod report;

pub use report::dev_error_to_miette;

/// Top-level dev session error.
#[derive(Debug, Error)]
pub enum DevError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A function build failed
    #[error("Build error: {0}")]
    Build(#[from] tether_runtime::BuildError),

    /// A worker could not be started or stopped
    #[error("Worker error: {0}")]
    Worker(#[from] tether_runtime::WorkerError),

    /// Publishing to the event bus failed
    #[error("Event bus error: {0}")]
    Bus(#[from] tether_bus::BusError),

    /// The control server could not bind or stopped with an error
    #[error("Server error: {0}")]
    Server(String),

    /// HTTP failure talking to a remote session
    #[error("Client error: {0}")]
    Client(#[from] reqwest::Error),

    /// A remote session answered with a non-success status
    #[error("Request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// No function with this id was registered for reloads
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Directory to watch does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sources could not be merged or extracted
    #[error("Invalid configuration: {0}\n\nHint: Check tether.config.json syntax and TETHER_* environment variables")]
    Extract(String),

    /// A value is out of range
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },
}

pub type Result<T, E = DevError> = std::result::Result<T, E>;
