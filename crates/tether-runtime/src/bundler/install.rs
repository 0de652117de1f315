//! Installs packages that are kept out of the bundle.

use crate::error::{BuildError, Result};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Writes `package.json` into `out_dir` and runs `npm install` there.
///
/// Versions are pinned to whatever the project currently has installed under
/// `node_modules`, or `*` when the package is not installed.
pub async fn install_packages(root: &Path, out_dir: &Path, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }

    let mut dependencies = Map::new();
    for package in packages {
        let version = installed_version(root, package)
            .await
            .unwrap_or_else(|| "*".to_string());
        dependencies.insert(package.clone(), Value::String(version));
    }

    tokio::fs::create_dir_all(out_dir).await?;
    let manifest = json!({ "dependencies": dependencies });
    tokio::fs::write(
        out_dir.join("package.json"),
        serde_json::to_vec_pretty(&manifest)?,
    )
    .await?;

    tracing::debug!(out_dir = %out_dir.display(), ?packages, "installing packages");

    let output = Command::new("npm")
        .arg("install")
        .current_dir(out_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| BuildError::Install {
            out_dir: out_dir.to_path_buf(),
            message: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(BuildError::Install {
            out_dir: out_dir.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn installed_version(root: &Path, package: &str) -> Option<String> {
    let path = root
        .join("node_modules")
        .join(package)
        .join("package.json");
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.get("version")?.as_str().map(str::to_string)
}
