//! Error handling for builds and workers.
//!
//! Build failures carry structured [`Diagnostic`]s so callers can render them
//! next to the offending source, the same way the bundler reports them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Severity level of a bundler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// One message reported by the bundler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                write!(f, "{}:{}:{}: {}", file, line, column, self.message)
            }
            (Some(file), _, _) => write!(f, "{}: {}", file, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Build errors.
///
/// None of these are fatal to the engine: a failed build leaves the previous
/// artifact for that function in place.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No source file exists for the handler under any supported extension
    #[error("Entry point not found for handler '{handler}' in {}\n\nHint: Check the handler path and that the file has a .ts/.js (or similar) extension", .root.display())]
    EntryNotFound { handler: String, root: PathBuf },

    /// A build property could not be resolved
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidConfig {
        field: String,
        value: String,
        hint: String,
    },

    /// The bundler executable could not be started
    #[error("Failed to start bundler '{}': {source}", .binary.display())]
    BundlerSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bundler ran and reported errors
    #[error("Build failed for '{function_id}' with {} error(s)", error_count(.diagnostics))]
    Bundle {
        function_id: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// Installing externally provided packages into the output failed
    #[error("Failed to install packages into {}: {message}", .out_dir.display())]
    Install { out_dir: PathBuf, message: String },

    /// The concurrency limiter was shut down
    #[error("Build limiter is closed")]
    LimiterClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

impl BuildError {
    /// Diagnostics attached to a bundler failure, empty otherwise.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            BuildError::Bundle { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/// Worker process errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be spawned
    #[error("Failed to spawn worker '{worker_id}' ({}): {source}", .program.display())]
    Spawn {
        worker_id: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `logs()` can only hand out the pipes once
    #[error("Logs for worker '{0}' were already taken")]
    LogsTaken(String),

    /// Signalling or waiting on the process failed
    #[error("Worker '{worker_id}' process error: {source}")]
    Process {
        worker_id: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_location() {
        let diagnostic = Diagnostic {
            file: Some("src/index.ts".to_string()),
            line: Some(3),
            column: Some(7),
            ..Diagnostic::error("Could not resolve \"left-pad\"")
        };
        assert_eq!(
            diagnostic.to_string(),
            "src/index.ts:3:7: Could not resolve \"left-pad\""
        );
    }

    #[test]
    fn test_bundle_error_counts_only_errors() {
        let err = BuildError::Bundle {
            function_id: "Api".to_string(),
            diagnostics: vec![
                Diagnostic::error("boom"),
                Diagnostic {
                    severity: DiagnosticSeverity::Warning,
                    ..Diagnostic::error("meh")
                },
            ],
        };
        assert_eq!(err.to_string(), "Build failed for 'Api' with 1 error(s)");
        assert_eq!(err.diagnostics().len(), 2);
    }
}
