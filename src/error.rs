//! Error types for the report grader.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, GraderError>;

/// Errors that can occur while grading a report.
#[derive(Error, Debug)]
pub enum GraderError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An input document (report, task or eval file) does not exist.
    #[error("Input file not found at '{0}'")]
    InputNotFound(PathBuf),

    /// Invalid grading parameters, e.g. a chunk window that cannot advance.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// The judge answered, but not in a shape we could read.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// Embedding provider error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A binary source document could not be read as text.
    #[error("Document extraction failed: {0}")]
    Document(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Metric name not recognised.
    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),
}

impl GraderError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from a malformed judge reply.
    pub fn is_parse(&self) -> bool {
        matches!(self, GraderError::LlmParse(_))
    }
}

impl From<reqwest::Error> for GraderError {
    fn from(err: reqwest::Error) -> Self {
        GraderError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for GraderError {
    fn from(err: serde_json::Error) -> Self {
        GraderError::LlmParse(err.to_string())
    }
}
