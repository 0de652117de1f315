//! Local dev session for tether projects.
//!
//! A session ties together the event bus, an ndjson stream server with
//! control endpoints, a file watcher, and the reloader that rebuilds and
//! restarts functions when their sources change.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_dev::{DevSession, LinkEnvProvider, SessionConfig, SessionOptions};
//! use tether_runtime::{EsbuildBundler, WorkerCommand};
//!
//! # async fn run() -> tether_dev::Result<()> {
//! let root = std::env::current_dir()?;
//! let config = SessionConfig::load(&root)?;
//! let session = DevSession::start(
//!     &config,
//!     SessionOptions {
//!         bundler: Arc::new(EsbuildBundler::default()),
//!         root,
//!         env: Arc::new(LinkEnvProvider),
//!         worker_command: WorkerCommand::node("bridge.mjs"),
//!         functions: Vec::new(),
//!         watch: true,
//!     },
//! )
//! .await?;
//! println!("listening on {}", session.url());
//! session.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dev;
pub mod env;
pub mod error;
pub mod events;
pub mod logger;

pub use client::DevClient;
pub use config::{CONFIG_FILE, SessionConfig};
pub use dev::{
    DevServer, DevSession, EnvQuery, EnvResponse, FileWatcher, FunctionSpec, Reloader,
    SessionOptions, SessionState, SharedState,
};
pub use env::{EnvProvider, LinkEnvProvider, RESOURCE_ENV_PREFIX};
pub use error::{ConfigError, DevError, Result, dev_error_to_miette};
pub use events::{
    CompleteEvent, DeployRequestedEvent, Dev, FileChangedEvent, FunctionBuildEvent,
    FunctionLogEvent,
};
pub use logger::{LogOptions, init_logger};
