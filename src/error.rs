//! Error types for sql-depscan.
//!
//! Internal stages report failures through [`AnalysisError`]; nothing from this
//! crate ever reaches the host as an error. Every public entry point folds
//! failures into [`Diagnostic`] records on the returned result instead.

use serde::Serialize;
use thiserror::Error;

/// Errors raised internally by analysis stages.
///
/// These are caught at each tier boundary by the orchestrator and converted
/// into diagnostics; they never escape `analyze_dependencies`.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("tokenization failed: {message}")]
    Tokenize { message: String },

    #[error("structural extraction failed: {message}")]
    Structure { message: String },

    #[error("external fetch failed: {operation}")]
    ExternalFetch {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("all analysis strategies failed")]
    AllStrategiesFailed,
}

/// Machine-readable diagnostic category, matching the error taxonomy exposed
/// to hosts in result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    InvalidInput,
    EmptyDefinition,
    StrategyFailure,
    AllStrategiesFailed,
    ExternalFetchError,
    InputTruncated,
    NormalizerFallback,
}

/// One recoverable event observed during an analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}
