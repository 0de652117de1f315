//! Build and run Node.js function handlers locally.
//!
//! - [`config`] merges declared build properties with session defaults
//! - [`bundler`] drives the bundler (esbuild by default)
//! - [`BuildEngine`] bounds concurrent builds and tracks what each one read
//! - [`WorkerSupervisor`] runs built handlers as OS processes with merged logs

pub mod bundler;
pub mod config;
pub mod engine;
pub mod error;
pub mod worker;

pub use bundler::{BundleOutput, BundleRequest, Bundler, EsbuildBundler};
pub use config::{
    BuildDefaults, DEFAULT_BUILD_CONCURRENCY, EsbuildOptions, Format, Loader, NodeProperties,
    ResolvedBuildConfig, SourceMap, Target, concurrency_limit,
};
pub use engine::{BuildEngine, BuildInput, BuildOutput, BuildResult, DependencyManifest};
pub use error::{BuildError, Diagnostic, DiagnosticSeverity, Result, WorkerError};
pub use worker::{
    LogLine, LogSource, LogStream, RUNTIME_API_ENV, RunInput, Worker, WorkerCommand,
    WorkerSupervisor,
};
