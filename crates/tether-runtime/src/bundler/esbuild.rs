//! esbuild CLI integration.

use super::{BundleOutput, BundleRequest, Bundler};
use crate::config::ResolvedBuildConfig;
use crate::error::{BuildError, Diagnostic, DiagnosticSeverity, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Base name of the emitted entry chunk.
const ENTRY_NAME: &str = "bundle";

const METAFILE_NAME: &str = "metafile.json";

/// Runs the `esbuild` binary once per build.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: PathBuf,
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

impl EsbuildBundler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// A bare binary name prefers the project's own copy in `node_modules/.bin`.
    async fn binary_for(&self, root: &Path) -> PathBuf {
        if self.binary.components().count() == 1 {
            let local = root.join("node_modules").join(".bin").join(&self.binary);
            let is_file = tokio::fs::metadata(&local)
                .await
                .is_ok_and(|meta| meta.is_file());
            if is_file {
                return local;
            }
        }
        self.binary.clone()
    }

    fn args(request: &BundleRequest, metafile: &Path) -> Vec<String> {
        let config: &ResolvedBuildConfig = &request.config;
        let mut args = vec![
            request.entry.display().to_string(),
            "--bundle".to_string(),
            "--platform=node".to_string(),
            format!("--format={}", config.format.as_str()),
            format!("--target={}", config.target.as_str()),
            format!("--outdir={}", request.out_dir.display()),
            format!("--entry-names={}", ENTRY_NAME),
            format!("--out-extension:.js=.{}", config.format.extension()),
            format!("--metafile={}", metafile.display()),
            "--log-level=warning".to_string(),
        ];

        match config.sourcemap.flag() {
            Some("linked") => args.push("--sourcemap".to_string()),
            Some(mode) => args.push(format!("--sourcemap={}", mode)),
            None => {}
        }
        if config.keep_names {
            args.push("--keep-names".to_string());
        }
        if !config.main_fields.is_empty() {
            args.push(format!("--main-fields={}", config.main_fields.join(",")));
        }
        if !config.conditions.is_empty() {
            args.push(format!("--conditions={}", config.conditions.join(",")));
        }
        for package in &config.external {
            args.push(format!("--external:{}", package));
        }
        for (extension, loader) in &config.loaders {
            args.push(format!("--loader:{}={}", extension, loader.as_str()));
        }
        for (key, value) in &config.define {
            args.push(format!("--define:{}={}", key, value));
        }
        if let Some(banner) = &config.banner {
            args.push(format!("--banner:js={}", banner));
        }
        if config.minify {
            args.push("--minify".to_string());
        }
        if config.splitting {
            args.push("--splitting".to_string());
        }
        args
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput> {
        tokio::fs::create_dir_all(&request.out_dir).await?;

        let metafile = request.out_dir.join(METAFILE_NAME);
        let binary = self.binary_for(&request.root).await;

        let mut cmd = Command::new(&binary);
        cmd.args(Self::args(request, &metafile))
            .current_dir(&request.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !request.config.node_paths.is_empty() {
            if let Ok(joined) = std::env::join_paths(&request.config.node_paths) {
                cmd.env("NODE_PATH", joined);
            }
        }

        tracing::debug!(
            function_id = %request.function_id,
            entry = %request.entry.display(),
            binary = %binary.display(),
            "running bundler"
        );

        let output = cmd
            .output()
            .await
            .map_err(|source| BuildError::BundlerSpawn { binary, source })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&stderr);

        if !output.status.success() || diagnostics.iter().any(Diagnostic::is_error) {
            if !diagnostics.iter().any(Diagnostic::is_error) {
                let message = match stderr.trim() {
                    "" => format!("bundler exited with {}", output.status),
                    text => text.to_string(),
                };
                diagnostics.push(Diagnostic::error(message));
            }
            return Err(BuildError::Bundle {
                function_id: request.function_id.clone(),
                diagnostics,
            });
        }

        let metafile = tokio::fs::read_to_string(&metafile).await?;
        let artifact = request.out_dir.join(format!(
            "{}.{}",
            ENTRY_NAME,
            request.config.format.extension()
        ));

        Ok(BundleOutput {
            artifact,
            metafile,
            warnings: diagnostics,
        })
    }
}

/// Extracts `✘ [ERROR]` and `▲ [WARNING]` messages from esbuild's stderr.
///
/// The first `path:line:col:` line following a header becomes its location.
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut awaiting_location = false;

    for line in stderr.lines() {
        let trimmed = line.trim();
        if let Some((severity, message)) = parse_header(trimmed) {
            diagnostics.push(Diagnostic {
                severity,
                message: message.to_string(),
                file: None,
                line: None,
                column: None,
            });
            awaiting_location = true;
            continue;
        }

        if !awaiting_location || trimmed.is_empty() {
            continue;
        }
        awaiting_location = false;

        if let (Some(last), Some((file, line, column))) =
            (diagnostics.last_mut(), parse_location(trimmed))
        {
            last.file = Some(file.to_string());
            last.line = Some(line);
            last.column = Some(column);
        }
    }

    diagnostics
}

fn parse_header(line: &str) -> Option<(DiagnosticSeverity, &str)> {
    let line = line.trim_start_matches(['✘', '▲', 'X', ' ']);
    if let Some(rest) = line.strip_prefix("[ERROR]") {
        return Some((DiagnosticSeverity::Error, strip_plugin_suffix(rest.trim())));
    }
    if let Some(rest) = line.strip_prefix("[WARNING]") {
        return Some((DiagnosticSeverity::Warning, strip_plugin_suffix(rest.trim())));
    }
    None
}

/// esbuild appends the check name in brackets, e.g. `[unsupported-require-call]`.
fn strip_plugin_suffix(message: &str) -> &str {
    match message.rfind(" [") {
        Some(index) if message.ends_with(']') => &message[..index],
        _ => message,
    }
}

fn parse_location(line: &str) -> Option<(&str, u32, u32)> {
    let line = line.strip_suffix(':')?;
    let mut parts = line.rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let row = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    if file.is_empty() {
        return None;
    }
    Some((file, row, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildDefaults, NodeProperties};
    use std::sync::Arc;

    const STDERR: &str = "\
✘ [ERROR] Could not resolve \"left-pad\"

    src/index.ts:3:7:
      3 │ import pad from \"left-pad\";
        ╵                 ~~~~~~~~~~

  You can mark the path \"left-pad\" as external to exclude it from the bundle.

▲ [WARNING] Indirect calls to \"require\" will not be bundled [indirect-require]

    src/util.ts:10:2:
      10 │   (0, require)(\"x\");
         ╵       ~~~~~~~

1 error
";

    #[test]
    fn test_parse_diagnostics_with_locations() {
        let diagnostics = parse_diagnostics(STDERR);
        assert_eq!(diagnostics.len(), 2);

        assert!(diagnostics[0].is_error());
        assert_eq!(diagnostics[0].message, "Could not resolve \"left-pad\"");
        assert_eq!(diagnostics[0].file.as_deref(), Some("src/index.ts"));
        assert_eq!(diagnostics[0].line, Some(3));
        assert_eq!(diagnostics[0].column, Some(7));

        assert_eq!(diagnostics[1].severity, DiagnosticSeverity::Warning);
        assert_eq!(
            diagnostics[1].message,
            "Indirect calls to \"require\" will not be bundled"
        );
        assert_eq!(diagnostics[1].line, Some(10));
    }

    #[test]
    fn test_parse_diagnostics_without_location() {
        let diagnostics = parse_diagnostics("✘ [ERROR] Must use \"outdir\" when there are multiple input files\n\n");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].file.is_none());
    }

    #[test]
    fn test_args_reflect_resolved_config() {
        let props: NodeProperties = serde_json::from_str(
            r#"{
                "format": "cjs",
                "minify": true,
                "install": ["sharp"],
                "loader": {".png": "file"},
                "esbuild": {"sourcemap": "inline", "keepNames": false, "conditions": ["node"]}
            }"#,
        )
        .unwrap();
        let config = BuildDefaults::default().resolve(&props).unwrap();
        let request = BundleRequest {
            function_id: "Api".to_string(),
            entry: PathBuf::from("/p/src/api.ts"),
            root: PathBuf::from("/p"),
            out_dir: PathBuf::from("/p/.out/Api"),
            config: Arc::new(config),
        };

        let args = EsbuildBundler::args(&request, Path::new("/p/.out/Api/metafile.json"));
        assert_eq!(args[0], "/p/src/api.ts");
        assert!(args.contains(&"--format=cjs".to_string()));
        assert!(args.contains(&"--out-extension:.js=.cjs".to_string()));
        assert!(args.contains(&"--sourcemap=inline".to_string()));
        assert!(!args.contains(&"--keep-names".to_string()));
        assert!(args.contains(&"--conditions=node".to_string()));
        assert!(args.contains(&"--main-fields=module,main".to_string()));
        assert!(args.contains(&"--external:sharp".to_string()));
        assert!(args.contains(&"--loader:.png=file".to_string()));
        assert!(args.contains(&"--minify".to_string()));
    }

    #[test]
    fn test_linked_sourcemap_uses_bare_flag() {
        let config = BuildDefaults::default()
            .resolve(&NodeProperties::default())
            .unwrap();
        let request = BundleRequest {
            function_id: "Api".to_string(),
            entry: PathBuf::from("/p/api.ts"),
            root: PathBuf::from("/p"),
            out_dir: PathBuf::from("/p/out"),
            config: Arc::new(config),
        };
        let args = EsbuildBundler::args(&request, Path::new("/p/out/metafile.json"));
        assert!(args.contains(&"--sourcemap".to_string()));
        assert!(args.contains(&"--keep-names".to_string()));
        assert!(args.contains(&"--out-extension:.js=.mjs".to_string()));
    }
}
