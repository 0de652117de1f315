//! Dev session module.
//!
//! Wires the pieces of a local dev session together:
//! - Event bus shared by every component
//! - Stream server and control endpoints
//! - Completion snapshot cache
//! - File watching with debouncing
//! - Rebuild and worker restart on change

pub mod reloader;
pub mod server;
pub mod state;
pub mod watcher;

pub use reloader::{FunctionSpec, Reloader};
pub use server::{DevServer, EnvQuery, EnvResponse, router, serve};
pub use state::{SessionState, SharedState};
pub use watcher::FileWatcher;

use crate::config::SessionConfig;
use crate::env::EnvProvider;
use crate::error::{DevError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tether_bus::EventBus;
use tether_runtime::{BuildEngine, Bundler, WorkerCommand, WorkerSupervisor};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Collaborators of a session that are not plain configuration.
pub struct SessionOptions {
    /// Project root; dev directories and handlers resolve against it
    pub root: PathBuf,
    pub env: Arc<dyn EnvProvider>,
    pub bundler: Arc<dyn Bundler>,
    pub worker_command: WorkerCommand,
    pub functions: Vec<FunctionSpec>,
    /// Start a file watcher on `root`
    pub watch: bool,
}

/// A running dev session.
pub struct DevSession {
    state: SharedState,
    engine: Arc<BuildEngine>,
    addr: SocketAddr,
    server: JoinHandle<Result<()>>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<FileWatcher>,
}

impl DevSession {
    /// Starts the server, builds and runs every function, and begins
    /// watching for changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server address cannot be bound or the watcher
    /// cannot start. Individual build failures are published, not returned.
    pub async fn start(config: &SessionConfig, options: SessionOptions) -> Result<Self> {
        config.validate()?;
        tracing::info!(service = "dev", root = %options.root.display(), "starting");

        // Nothing is spawned until the watcher and listener are up.
        let bus = EventBus::new(config.subscriber_capacity);
        let watcher = if options.watch {
            Some(FileWatcher::start(
                options.root.clone(),
                config.watch_ignore.clone(),
                config.debounce_ms,
                bus.clone(),
            )?)
        } else {
            None
        };
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|e| DevError::Server(format!("Failed to bind to {}: {}", config.addr, e)))?;
        let addr = listener.local_addr()?;

        let state = Arc::new(SessionState::new(bus.clone(), options.env, options.root));
        let cancel = state.cancel_token().clone();
        let mut tasks = vec![state.spawn_completion_cache()];
        let server = tokio::spawn(serve(listener, Arc::clone(&state)));

        let engine = Arc::new(BuildEngine::new(
            options.bundler,
            config.build.clone(),
            config.concurrency_limit(),
        ));
        let mut reloader = Reloader::new(
            bus,
            Arc::clone(&engine),
            WorkerSupervisor::new(options.worker_command),
        );
        for spec in options.functions {
            reloader.register(spec);
        }
        reloader.start_all().await;
        tasks.push(tokio::spawn(reloader.run(cancel)));

        Ok(Self {
            state,
            engine,
            addr,
            server,
            tasks,
            _watcher: watcher,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for [`crate::client::DevClient`].
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn bus(&self) -> &EventBus {
        self.state.bus()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn engine(&self) -> &Arc<BuildEngine> {
        &self.engine
    }

    /// Cancels every loop, stops all workers and waits for the server.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(service = "dev", "shutting down");
        self.state.cancel_token().cancel();
        self.engine.shutdown();
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(service = "dev", error = %err, "session task failed");
            }
        }
        match self.server.await {
            Ok(result) => result?,
            Err(err) => return Err(DevError::Server(format!("Server task failed: {}", err))),
        }
        tracing::info!(service = "dev", "done");
        Ok(())
    }
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("addr", &self.addr)
            .field("engine", &self.engine)
            .finish()
    }
}
