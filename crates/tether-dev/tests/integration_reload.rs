//! Integration tests for rebuild-and-restart on file changes.
//!
//! Builds go through a scripted bundler; workers are `sh` processes that
//! print their arguments and wait to be stopped.

#![cfg(unix)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tether_bus::EventBus;
use tether_dev::{
    DevError, FileChangedEvent, FunctionBuildEvent, FunctionLogEvent, FunctionSpec, Reloader,
};
use tether_runtime::{
    BuildDefaults, BuildEngine, BuildInput, BundleOutput, BundleRequest, Bundler, NodeProperties,
    WorkerCommand, WorkerSupervisor,
};
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// Writes `bundle.mjs` and reports the entry plus `src/lib/db.ts` as inputs.
#[derive(Default)]
struct ScriptedBundler {
    calls: AtomicUsize,
}

#[async_trait]
impl Bundler for ScriptedBundler {
    async fn bundle(&self, request: &BundleRequest) -> tether_runtime::Result<BundleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(&request.out_dir).await?;
        let artifact = request.out_dir.join("bundle.mjs");
        tokio::fs::write(&artifact, "export const handler = () => 1").await?;
        let entry = request
            .entry
            .strip_prefix(&request.root)
            .unwrap_or(&request.entry)
            .display()
            .to_string();
        let metafile = serde_json::json!({
            "inputs": { entry: {}, "src/lib/db.ts": {} },
            "outputs": {}
        });
        Ok(BundleOutput {
            artifact,
            metafile: metafile.to_string(),
            warnings: Vec::new(),
        })
    }
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("src/lib")).unwrap();
    std::fs::write(root.join("src/api.ts"), "export const handler = () => 1").unwrap();
    std::fs::write(root.join("src/lib/db.ts"), "export {}").unwrap();
    std::fs::write(root.join("src/other.ts"), "export {}").unwrap();
    dir
}

fn spec(root: &Path, function_id: &str, handler: &str) -> FunctionSpec {
    FunctionSpec {
        build: BuildInput {
            function_id: function_id.to_string(),
            handler: handler.to_string(),
            root: root.to_path_buf(),
            out_dir: root.join(".tether/artifacts").join(function_id),
            properties: NodeProperties::default(),
        },
        server: "http://127.0.0.1:13557/api/function".to_string(),
        env: HashMap::from([("STAGE".to_string(), "dev".to_string())]),
    }
}

/// `$1` is the artifact and `$2` the worker id.
fn echo_worker() -> WorkerSupervisor {
    WorkerSupervisor::new(WorkerCommand::new(
        "sh",
        [
            "-c",
            "echo \"ready $2 $STAGE\"; echo \"api $AWS_LAMBDA_RUNTIME_API\" >&2; exec sleep 30",
            "sh",
        ],
    ))
}

fn reloader(bus: &EventBus, bundler: Arc<ScriptedBundler>) -> Reloader {
    let engine = Arc::new(BuildEngine::new(bundler, BuildDefaults::default(), 2));
    Reloader::new(bus.clone(), engine, echo_worker())
}

#[tokio::test]
async fn test_start_all_builds_and_forwards_logs() {
    let project = project();
    let root = project.path();
    let bus = EventBus::new(64);
    let mut builds = bus.subscribe::<FunctionBuildEvent>();
    let mut logs = bus.subscribe::<FunctionLogEvent>();

    let mut reloader = reloader(&bus, Arc::new(ScriptedBundler::default()));
    reloader.register(spec(root, "Api", "src/api.handler"));
    reloader.start_all().await;

    let build = timeout(Duration::from_secs(5), builds.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(build.function_id, "Api");
    assert!(build.success);
    assert!(build.errors.is_empty());

    let worker = reloader.worker("Api").unwrap();
    assert_eq!(worker.id(), "Api-1");

    let mut lines = Vec::new();
    while lines.len() < 2 {
        let log = timeout(Duration::from_secs(5), logs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.function_id, "Api");
        assert_eq!(log.worker_id, "Api-1");
        lines.push((log.stream.clone(), log.line.clone()));
    }
    assert!(lines.contains(&("stdout".to_string(), "ready Api-1 dev".to_string())));
    assert!(lines.iter().any(|(stream, line)| {
        stream == "stderr" && line.contains("127.0.0.1:13557/api/function")
    }));

    reloader.stop_all().await;
    assert!(reloader.worker("Api").is_none());
}

#[tokio::test]
async fn test_change_rebuilds_only_dependents() {
    let project = project();
    let root = project.path();
    let bus = EventBus::new(64);
    let bundler = Arc::new(ScriptedBundler::default());

    let mut reloader = reloader(&bus, Arc::clone(&bundler));
    reloader.register(spec(root, "Api", "src/api.handler"));
    reloader.register(spec(root, "Other", "src/other.handler"));
    reloader.start_all().await;
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);

    let rebuilt = reloader.handle_change(&root.join("src/api.ts")).await;
    assert_eq!(rebuilt, vec!["Api".to_string()]);
    assert_eq!(reloader.worker("Api").unwrap().id(), "Api-3");

    let rebuilt = reloader.handle_change(&root.join("src/lib/db.ts")).await;
    assert_eq!(rebuilt, vec!["Api".to_string(), "Other".to_string()]);

    let rebuilt = reloader.handle_change(&root.join("README.md")).await;
    assert!(rebuilt.is_empty());
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 5);

    reloader.stop_all().await;
}

#[tokio::test]
async fn test_failed_build_is_published() {
    let project = project();
    let root = project.path();
    let bus = EventBus::new(64);
    let mut builds = bus.subscribe::<FunctionBuildEvent>();

    let mut reloader = reloader(&bus, Arc::new(ScriptedBundler::default()));
    reloader.register(spec(root, "Missing", "src/missing.handler"));
    reloader.start_all().await;

    let build = timeout(Duration::from_secs(5), builds.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(build.function_id, "Missing");
    assert!(!build.success);
    assert_eq!(build.errors.len(), 1);
    assert!(build.errors[0].message.contains("src/missing.handler"));
    assert!(reloader.worker("Missing").is_none());
}

#[tokio::test]
async fn test_reload_unknown_function() {
    let bus = EventBus::new(16);
    let mut reloader = reloader(&bus, Arc::new(ScriptedBundler::default()));
    let err = reloader.reload("Nope").await.unwrap_err();
    assert!(matches!(err, DevError::UnknownFunction(id) if id == "Nope"));
}

#[tokio::test]
async fn test_run_reacts_to_file_changes() {
    let project = project();
    let root = project.path();
    let bus = EventBus::new(64);
    let mut builds = bus.subscribe::<FunctionBuildEvent>();
    let bundler = Arc::new(ScriptedBundler::default());

    let mut reloader = reloader(&bus, Arc::clone(&bundler));
    reloader.register(spec(root, "Api", "src/api.handler"));
    reloader.start_all().await;
    timeout(Duration::from_secs(5), builds.recv())
        .await
        .unwrap()
        .unwrap();

    let cancel = CancellationToken::new();
    let running = tokio::spawn(reloader.run(cancel.clone()));

    bus.publish(FileChangedEvent {
        path: root.join("src/lib/db.ts"),
    })
    .unwrap();
    let rebuild = timeout(Duration::from_secs(5), builds.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebuild.function_id, "Api");
    assert!(rebuild.success);
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);

    cancel.cancel();
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
}
