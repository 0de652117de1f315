//! Rebuilds and restarts functions when their sources change.
//!
//! The reloader owns every running worker. On each `FileChangedEvent` it asks
//! the build engine which registered functions read the changed file, rebuilds
//! those (concurrently, within the engine's limit), and swaps in a fresh worker
//! for each successful build. Worker output is forwarded to the bus as
//! `FunctionLogEvent`s.

use crate::error::{DevError, Result};
use crate::events::{FileChangedEvent, FunctionBuildEvent, FunctionLogEvent};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tether_bus::{EventBus, TypedSubscription};
use tether_runtime::{
    BuildEngine, BuildInput, BuildOutput, Diagnostic, LogSource, RunInput, Worker,
    WorkerSupervisor,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A function the session builds and runs.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub build: BuildInput,
    /// Invocation endpoint handed to workers
    pub server: String,
    pub env: HashMap<String, String>,
}

impl FunctionSpec {
    pub fn id(&self) -> &str {
        &self.build.function_id
    }
}

pub struct Reloader {
    bus: EventBus,
    engine: Arc<BuildEngine>,
    supervisor: WorkerSupervisor,
    functions: BTreeMap<String, FunctionSpec>,
    workers: HashMap<String, Worker>,
    changes: TypedSubscription<FileChangedEvent>,
    next_worker: u64,
}

impl Reloader {
    /// Subscribes to file changes immediately; changes published before
    /// [`Reloader::run`] starts are buffered.
    pub fn new(bus: EventBus, engine: Arc<BuildEngine>, supervisor: WorkerSupervisor) -> Self {
        let changes = bus.subscribe::<FileChangedEvent>();
        Self {
            bus,
            engine,
            supervisor,
            functions: BTreeMap::new(),
            workers: HashMap::new(),
            changes,
            next_worker: 0,
        }
    }

    /// Registers (or replaces) a function.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.id().to_string(), spec);
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> + '_ {
        self.functions.keys().map(String::as_str)
    }

    /// Currently running worker of `function_id`.
    pub fn worker(&self, function_id: &str) -> Option<&Worker> {
        self.workers.get(function_id)
    }

    /// Builds and starts every registered function.
    ///
    /// Failures are published and logged; they do not stop the others.
    pub async fn start_all(&mut self) {
        let ids: Vec<String> = self.functions.keys().cloned().collect();
        self.rebuild(ids).await;
    }

    /// Rebuilds every function whose last build read `path`.
    ///
    /// Returns the ids that were rebuilt successfully.
    pub async fn handle_change(&mut self, path: &Path) -> Vec<String> {
        let stale: Vec<String> = self
            .functions
            .keys()
            .filter(|id| self.engine.should_rebuild(id, path))
            .cloned()
            .collect();
        if stale.is_empty() {
            return stale;
        }
        tracing::info!(path = %path.display(), functions = ?stale, "sources changed, rebuilding");
        self.rebuild(stale).await
    }

    /// Builds and restarts one function.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::UnknownFunction`] for unregistered ids, or the
    /// build or spawn failure.
    pub async fn reload(&mut self, function_id: &str) -> Result<()> {
        let spec = self
            .functions
            .get(function_id)
            .ok_or_else(|| DevError::UnknownFunction(function_id.to_string()))?;
        let result = self.engine.build(&spec.build).await;
        self.publish_build(function_id, &result);
        let output = result?;
        self.restart(function_id, &output).await
    }

    async fn rebuild(&mut self, ids: Vec<String>) -> Vec<String> {
        let mut builds = JoinSet::new();
        for id in ids {
            let Some(spec) = self.functions.get(&id) else {
                continue;
            };
            let engine = Arc::clone(&self.engine);
            let input = spec.build.clone();
            builds.spawn(async move {
                let result = engine.build(&input).await;
                (id, result)
            });
        }

        let mut rebuilt = Vec::new();
        while let Some(joined) = builds.join_next().await {
            let (id, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(error = %err, "build task failed");
                    continue;
                }
            };
            self.publish_build(&id, &result);
            match result {
                Ok(output) => match self.restart(&id, &output).await {
                    Ok(()) => rebuilt.push(id),
                    Err(err) => tracing::error!(function_id = %id, error = %err, "worker failed to start"),
                },
                Err(err) => tracing::warn!(function_id = %id, error = %err, "build failed"),
            }
        }
        rebuilt.sort();
        rebuilt
    }

    fn publish_build(&self, function_id: &str, result: &tether_runtime::Result<BuildOutput>) {
        let event = match result {
            Ok(output) => FunctionBuildEvent {
                function_id: function_id.to_string(),
                success: true,
                errors: Vec::new(),
                duration_ms: output.duration.as_millis() as u64,
            },
            Err(err) => {
                let mut errors: Vec<Diagnostic> = err.diagnostics().to_vec();
                if errors.is_empty() {
                    errors.push(Diagnostic::error(err.to_string()));
                }
                FunctionBuildEvent {
                    function_id: function_id.to_string(),
                    success: false,
                    errors,
                    duration_ms: 0,
                }
            }
        };
        if let Err(err) = self.bus.publish(event) {
            tracing::warn!(function_id, error = %err, "failed to publish build event");
        }
    }

    /// Stops the current worker (if any) and starts one on `output`.
    async fn restart(&mut self, function_id: &str, output: &BuildOutput) -> Result<()> {
        if let Some(mut old) = self.workers.remove(function_id) {
            if let Err(err) = old.stop().await {
                tracing::warn!(worker_id = %old.id(), error = %err, "failed to stop worker");
            }
        }

        let spec = self
            .functions
            .get(function_id)
            .ok_or_else(|| DevError::UnknownFunction(function_id.to_string()))?;
        self.next_worker += 1;
        let worker_id = format!("{}-{}", function_id, self.next_worker);

        let mut worker = self.supervisor.run(RunInput {
            worker_id: worker_id.clone(),
            function_id: function_id.to_string(),
            artifact: output.out_dir.join(&output.handler),
            working_dir: output.out_dir.clone(),
            server: spec.server.clone(),
            env: spec.env.clone(),
        })?;

        let mut logs = worker.logs()?;
        let bus = self.bus.clone();
        let function_id = function_id.to_string();
        tokio::spawn(async move {
            while let Some(line) = logs.next_line().await {
                let stream = match line.source {
                    LogSource::Stdout => "stdout",
                    LogSource::Stderr => "stderr",
                };
                let event = FunctionLogEvent {
                    function_id: function_id.clone(),
                    worker_id: worker_id.clone(),
                    stream: stream.to_string(),
                    line: line.text().into_owned(),
                };
                if let Err(err) = bus.publish(event) {
                    tracing::warn!(error = %err, "failed to publish worker log");
                }
            }
        });

        self.workers.insert(worker.function_id().to_string(), worker);
        Ok(())
    }

    /// Stops every worker.
    pub async fn stop_all(&mut self) {
        for (_, mut worker) in self.workers.drain() {
            if let Err(err) = worker.stop().await {
                tracing::warn!(worker_id = %worker.id(), error = %err, "failed to stop worker");
            }
        }
    }

    /// Reacts to file changes until `cancel` fires, then stops all workers.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                change = self.changes.recv() => change,
            };
            match next {
                Some(change) => {
                    self.handle_change(&change.path).await;
                }
                None => {
                    tracing::warn!("reloader lagged behind file changes, resubscribing");
                    self.changes = self.bus.subscribe::<FileChangedEvent>();
                }
            }
        }
        self.stop_all().await;
    }
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("workers", &self.workers.len())
            .finish()
    }
}
