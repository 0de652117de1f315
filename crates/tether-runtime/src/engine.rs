//! Build engine for Node.js function handlers.
//!
//! The engine bounds how many bundler processes run at once, keeps the latest
//! successful [`BuildResult`] per function, and answers whether a changed file
//! belongs to a function's last build.

use crate::bundler::{BundleRequest, Bundler, install_packages};
use crate::config::{BuildDefaults, NodeProperties};
use crate::error::{BuildError, Diagnostic, Result};
use dashmap::DashMap;
use path_clean::PathClean;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Source extensions tried, in order, for a handler's base name.
pub const NODE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"];

/// Export used when a handler string names only a file.
const DEFAULT_EXPORT: &str = "handler";

/// A build request for one function.
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub function_id: String,
    /// `<path>/<file>.<export>`, e.g. `src/api.handler`
    pub handler: String,
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub properties: NodeProperties,
}

/// A successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub function_id: String,
    pub out_dir: PathBuf,
    pub artifact: PathBuf,
    /// Handler relative to `out_dir`, e.g. `bundle.handler`
    pub handler: String,
    pub warnings: Vec<Diagnostic>,
    pub duration: Duration,
}

impl BuildOutput {
    /// Artifact path handed to the worker process.
    pub fn entrypoint(&self) -> &Path {
        &self.artifact
    }
}

/// Input files a build read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyManifest {
    /// Absolute, lexically normalized input paths
    Inputs(HashSet<PathBuf>),
    /// The metafile could not be parsed; never matches any path
    Unreadable,
}

impl DependencyManifest {
    /// Parses a bundler metafile, resolving relative inputs against `root`.
    pub fn from_metafile(raw: &str, root: &Path) -> Self {
        let parsed: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable bundler metafile");
                return DependencyManifest::Unreadable;
            }
        };
        let Some(inputs) = parsed.get("inputs").and_then(|v| v.as_object()) else {
            return DependencyManifest::Unreadable;
        };

        let paths = inputs
            .keys()
            .map(|key| {
                let path = Path::new(key);
                if path.is_absolute() {
                    path.clean()
                } else {
                    root.join(path).clean()
                }
            })
            .collect();
        DependencyManifest::Inputs(paths)
    }

    pub fn contains(&self, path: &Path) -> bool {
        match self {
            DependencyManifest::Inputs(paths) => paths.contains(&path.clean()),
            DependencyManifest::Unreadable => false,
        }
    }
}

/// Latest successful build for one function.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub artifact: PathBuf,
    pub out_dir: PathBuf,
    pub handler: String,
    pub manifest: DependencyManifest,
}

/// Concurrency-bounded builder with per-function result storage.
pub struct BuildEngine {
    bundler: Arc<dyn Bundler>,
    defaults: BuildDefaults,
    limiter: Semaphore,
    limit: usize,
    results: DashMap<String, BuildResult>,
}

impl BuildEngine {
    /// `limit` is clamped to at least one concurrent build.
    pub fn new(bundler: Arc<dyn Bundler>, defaults: BuildDefaults, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            bundler,
            defaults,
            limiter: Semaphore::new(limit),
            limit,
            results: DashMap::new(),
        }
    }

    /// Whether this engine handles functions declared with `runtime`.
    pub fn matches(&self, runtime: &str) -> bool {
        runtime.starts_with("node")
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit
    }

    /// Latest successful build of `function_id`.
    pub fn result(&self, function_id: &str) -> Option<BuildResult> {
        self.results.get(function_id).map(|entry| entry.value().clone())
    }

    /// Whether `path` was an input of the last successful build of
    /// `function_id`. Unknown functions never need a rebuild.
    pub fn should_rebuild(&self, function_id: &str, path: &Path) -> bool {
        self.results
            .get(function_id)
            .is_some_and(|entry| entry.manifest.contains(path))
    }

    /// Fails every build still waiting for a slot.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    /// Builds one function.
    ///
    /// Waits for a free slot when the limit is reached. On failure the
    /// previous result for the function stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::EntryNotFound`] when no source file matches the
    /// handler, [`BuildError::InvalidConfig`] for unresolvable properties, and
    /// whatever the bundler or install step reports.
    pub async fn build(&self, input: &BuildInput) -> Result<BuildOutput> {
        let start = Instant::now();
        let (entry, export) = locate_entry(&input.handler, &input.root).await?;
        let config = Arc::new(self.defaults.resolve(&input.properties)?);

        let request = BundleRequest {
            function_id: input.function_id.clone(),
            entry,
            root: input.root.clone(),
            out_dir: input.out_dir.clone(),
            config: Arc::clone(&config),
        };

        let bundle = {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| BuildError::LimiterClosed)?;
            tracing::debug!(function_id = %input.function_id, "build started");
            self.bundler.bundle(&request).await?
        };

        install_packages(&input.root, &input.out_dir, &config.install).await?;

        let handler = format!("{}.{}", artifact_stem(&bundle.artifact), export);
        let manifest = DependencyManifest::from_metafile(&bundle.metafile, &input.root);
        self.results.insert(
            input.function_id.clone(),
            BuildResult {
                artifact: bundle.artifact.clone(),
                out_dir: input.out_dir.clone(),
                handler: handler.clone(),
                manifest,
            },
        );

        let duration = start.elapsed();
        tracing::info!(
            function_id = %input.function_id,
            duration_ms = duration.as_millis() as u64,
            warnings = bundle.warnings.len(),
            "build finished"
        );

        Ok(BuildOutput {
            function_id: input.function_id.clone(),
            out_dir: input.out_dir.clone(),
            artifact: bundle.artifact,
            handler,
            warnings: bundle.warnings,
            duration,
        })
    }
}

impl std::fmt::Debug for BuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEngine")
            .field("limit", &self.limit)
            .field("available", &self.limiter.available_permits())
            .field("results", &self.results.len())
            .finish()
    }
}

fn artifact_stem(artifact: &Path) -> String {
    artifact
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string())
}

/// Finds the source file for `handler` and returns it with the export name.
///
/// `src/api.handler` tries `src/api.ts`, `src/api.tsx`, ... in
/// [`NODE_EXTENSIONS`] order. Relative handlers resolve against `root`.
pub async fn locate_entry(handler: &str, root: &Path) -> Result<(PathBuf, String)> {
    let handler_path = Path::new(handler);
    let dir = handler_path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = handler_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (base, export) = match file_name.rsplit_once('.') {
        Some((base, export)) if !base.is_empty() => (base.to_string(), export.to_string()),
        _ => (file_name.clone(), DEFAULT_EXPORT.to_string()),
    };

    for extension in NODE_EXTENSIONS {
        let mut candidate = dir.join(format!("{}{}", base, extension));
        if !candidate.is_absolute() {
            candidate = root.join(candidate);
        }
        let is_file = tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|meta| meta.is_file());
        if is_file {
            return Ok((candidate.clean(), export));
        }
    }

    Err(BuildError::EntryNotFound {
        handler: handler.to_string(),
        root: root.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::BundleOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records concurrency and serves scripted metafiles.
    #[derive(Default)]
    struct FakeBundler {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
        delay: Duration,
        inputs: Mutex<Vec<&'static str>>,
        fail: Mutex<bool>,
    }

    impl FakeBundler {
        fn with_inputs(inputs: Vec<&'static str>) -> Self {
            Self {
                inputs: Mutex::new(inputs),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Bundler for FakeBundler {
        async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if *self.fail.lock().unwrap() {
                return Err(BuildError::Bundle {
                    function_id: request.function_id.clone(),
                    diagnostics: vec![Diagnostic::error("Expected \";\" but found \"}\"")],
                });
            }

            let inputs: serde_json::Map<String, serde_json::Value> = self
                .inputs
                .lock()
                .unwrap()
                .iter()
                .map(|input| (input.to_string(), serde_json::json!({"bytes": 1})))
                .collect();
            Ok(BundleOutput {
                artifact: request.out_dir.join("bundle.mjs"),
                metafile: serde_json::json!({"inputs": inputs, "outputs": {}}).to_string(),
                warnings: Vec::new(),
            })
        }
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/api.ts"), "export const handler = () => {}").unwrap();
        std::fs::write(dir.path().join("src/util.js"), "export const x = 1").unwrap();
        dir
    }

    fn input(root: &Path, function_id: &str) -> BuildInput {
        BuildInput {
            function_id: function_id.to_string(),
            handler: "src/api.handler".to_string(),
            root: root.to_path_buf(),
            out_dir: root.join(".out").join(function_id),
            properties: NodeProperties::default(),
        }
    }

    #[tokio::test]
    async fn test_locate_entry_tries_extensions_in_order() {
        let dir = project();
        std::fs::write(dir.path().join("src/api.js"), "").unwrap();

        let (entry, export) = locate_entry("src/api.handler", dir.path()).await.unwrap();
        assert_eq!(entry, dir.path().join("src/api.ts"));
        assert_eq!(export, "handler");

        let (entry, export) = locate_entry("src/util.main", dir.path()).await.unwrap();
        assert_eq!(entry, dir.path().join("src/util.js"));
        assert_eq!(export, "main");
    }

    #[tokio::test]
    async fn test_locate_entry_missing_file() {
        let dir = project();
        let err = locate_entry("src/missing.handler", dir.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::EntryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_locate_entry_skips_directories() {
        let dir = project();
        std::fs::create_dir_all(dir.path().join("src/jobs.ts")).unwrap();
        std::fs::write(dir.path().join("src/jobs.mjs"), "").unwrap();

        let (entry, export) = locate_entry("src/jobs.run", dir.path()).await.unwrap();
        assert_eq!(entry, dir.path().join("src/jobs.mjs"));
        assert_eq!(export, "run");
    }

    #[test]
    fn test_manifest_normalizes_inputs() {
        let root = Path::new("/project");
        let manifest = DependencyManifest::from_metafile(
            r#"{"inputs": {"src/./api.ts": {}, "node_modules/x/../y/index.js": {}}}"#,
            root,
        );
        assert!(manifest.contains(Path::new("/project/src/api.ts")));
        assert!(manifest.contains(Path::new("/project/node_modules/y/index.js")));
        assert!(manifest.contains(Path::new("/project/src/../src/api.ts")));
        assert!(!manifest.contains(Path::new("/project/src/other.ts")));
    }

    #[test]
    fn test_unreadable_manifest_never_matches() {
        let manifest = DependencyManifest::from_metafile("not json", Path::new("/p"));
        assert_eq!(manifest, DependencyManifest::Unreadable);
        assert!(!manifest.contains(Path::new("/p/src/api.ts")));
    }

    #[tokio::test]
    async fn test_build_stores_result_and_answers_rebuild() {
        let dir = project();
        let engine = BuildEngine::new(
            Arc::new(FakeBundler::with_inputs(vec!["src/api.ts", "src/util.js"])),
            BuildDefaults::default(),
            4,
        );

        let output = engine.build(&input(dir.path(), "Api")).await.unwrap();
        assert_eq!(output.handler, "bundle.handler");
        assert_eq!(output.entrypoint(), dir.path().join(".out/Api/bundle.mjs"));

        assert!(engine.should_rebuild("Api", &dir.path().join("src/util.js")));
        assert!(!engine.should_rebuild("Api", &dir.path().join("src/other.ts")));
        assert!(!engine.should_rebuild("Unknown", &dir.path().join("src/api.ts")));
        assert!(engine.result("Api").is_some());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_result() {
        let dir = project();
        let bundler = Arc::new(FakeBundler::with_inputs(vec!["src/api.ts"]));
        let engine = BuildEngine::new(bundler.clone(), BuildDefaults::default(), 4);

        engine.build(&input(dir.path(), "Api")).await.unwrap();
        *bundler.inputs.lock().unwrap() = vec!["src/util.js"];
        engine.build(&input(dir.path(), "Api")).await.unwrap();

        assert!(!engine.should_rebuild("Api", &dir.path().join("src/api.ts")));
        assert!(engine.should_rebuild("Api", &dir.path().join("src/util.js")));
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_result() {
        let dir = project();
        let bundler = Arc::new(FakeBundler::with_inputs(vec!["src/api.ts"]));
        let engine = BuildEngine::new(bundler.clone(), BuildDefaults::default(), 4);

        engine.build(&input(dir.path(), "Api")).await.unwrap();
        *bundler.fail.lock().unwrap() = true;

        let err = engine.build(&input(dir.path(), "Api")).await.unwrap_err();
        assert_eq!(err.diagnostics().len(), 1);
        assert!(engine.should_rebuild("Api", &dir.path().join("src/api.ts")));
    }

    #[tokio::test]
    async fn test_concurrent_builds_respect_limit() {
        let dir = project();
        let bundler = Arc::new(FakeBundler {
            delay: Duration::from_millis(30),
            ..FakeBundler::with_inputs(vec!["src/api.ts"])
        });
        let engine = Arc::new(BuildEngine::new(bundler.clone(), BuildDefaults::default(), 2));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let input = input(dir.path(), &format!("Fn{}", i));
            handles.push(tokio::spawn(async move { engine.build(&input).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(bundler.calls.load(Ordering::SeqCst), 8);
        assert!(bundler.max_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(engine.concurrency_limit(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_waiting_builds() {
        let dir = project();
        let engine = BuildEngine::new(
            Arc::new(FakeBundler::with_inputs(vec!["src/api.ts"])),
            BuildDefaults::default(),
            1,
        );
        engine.shutdown();
        let err = engine.build(&input(dir.path(), "Api")).await.unwrap_err();
        assert!(matches!(err, BuildError::LimiterClosed));
    }

    #[test]
    fn test_matches_node_runtimes() {
        let engine = BuildEngine::new(
            Arc::new(FakeBundler::default()),
            BuildDefaults::default(),
            4,
        );
        assert!(engine.matches("nodejs20.x"));
        assert!(engine.matches("node"));
        assert!(!engine.matches("python3.12"));
    }
}
