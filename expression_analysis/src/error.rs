//! Error types for the expression analysis pipeline

use thiserror::Error;

/// Failures that can abort an analysis run. There is no recovery path:
/// the operator fixes the input and re-runs from the top.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("invalid abundance bundle: {reason}")]
    InvalidBundle { reason: String },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("join on '{table}' changed the row count: expected {expected}, got {got}")]
    JoinRowMismatch {
        table: String,
        expected: usize,
        got: usize,
    },

    #[error("column '{column}' missing from {table}")]
    MissingColumn { table: String, column: String },

    #[error("invalid sample design: {reason}")]
    InvalidDesign { reason: String },

    #[error("annotation service error: {reason}")]
    AnnotationService { reason: String },

    #[error("normalization failed: {reason}")]
    NormalizationFailed { reason: String },

    #[error("unwanted-variation estimation failed: {reason}")]
    FactorAnalysisFailed { reason: String },

    #[error("rendering '{figure}' failed: {reason}")]
    Render { figure: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("table error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bundle cache error: {0}")]
    BundleCache(#[from] bincode::Error),
}

/// Result type alias used throughout the library
pub type Result<T> = std::result::Result<T, AnalysisError>;
