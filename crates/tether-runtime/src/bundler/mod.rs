//! Bundler adapter seam.
//!
//! The engine treats the bundler as opaque: it hands over an entry file and a
//! resolved configuration and gets back the emitted artifact plus the raw
//! metafile listing every input the bundler read.

mod esbuild;
mod install;

pub use esbuild::{EsbuildBundler, parse_diagnostics};
pub use install::install_packages;

use crate::config::ResolvedBuildConfig;
use crate::error::{Diagnostic, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a bundler needs for one build.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub function_id: String,
    /// Absolute path of the located source file
    pub entry: PathBuf,
    /// Project root; metafile inputs are relative to it
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub config: Arc<ResolvedBuildConfig>,
}

/// Successful bundle.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    /// Path of the emitted entry chunk
    pub artifact: PathBuf,
    /// Raw metafile JSON (`{"inputs": {...}, "outputs": {...}}`)
    pub metafile: String,
    pub warnings: Vec<Diagnostic>,
}

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Bundles `request.entry` into `request.out_dir`.
    ///
    /// # Errors
    ///
    /// [`crate::BuildError::Bundle`] when the bundler reports errors,
    /// [`crate::BuildError::BundlerSpawn`] when it cannot be started.
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput>;
}
