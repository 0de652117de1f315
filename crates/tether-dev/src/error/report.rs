//! Miette report conversion for dev session errors.

use super::DevError;
use miette::Report;
use tether_runtime::{BuildError, Diagnostic};

/// Convert DevError to miette Report
pub fn dev_error_to_miette(err: DevError) -> Report {
    match err {
        DevError::Build(e) => build_error_to_miette(e),
        DevError::Config(e) => miette::miette!("Configuration error: {}", e),
        _ => miette::miette!("{}", err),
    }
}

/// Convert BuildError to miette Report
fn build_error_to_miette(err: BuildError) -> Report {
    match err {
        BuildError::Bundle {
            function_id,
            diagnostics,
        } => {
            let rendered = render_diagnostics(&diagnostics);
            if rendered.is_empty() {
                miette::miette!("Build failed for {}", function_id)
            } else {
                miette::miette!("Build failed for {}:\n{}", function_id, rendered)
            }
        }
        BuildError::EntryNotFound { handler, root } => {
            miette::miette!(
                "Entry point not found for handler '{}' in {}\n\nHint: Check the handler path",
                handler,
                root.display()
            )
        }
        _ => miette::miette!("{}", err),
    }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| {
            let label = if d.is_error() { "error" } else { "warning" };
            format!("  {}: {}", label, d)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_error_report_lists_diagnostics() {
        let err = DevError::Build(BuildError::Bundle {
            function_id: "Api".to_string(),
            diagnostics: vec![Diagnostic {
                file: Some("src/api.ts".to_string()),
                line: Some(4),
                column: Some(2),
                ..Diagnostic::error("Unexpected \"}\"")
            }],
        });
        let report = dev_error_to_miette(err);
        let text = format!("{}", report);
        assert!(text.contains("Build failed for Api"));
        assert!(text.contains("error: src/api.ts:4:2: Unexpected \"}\""));
    }
}
