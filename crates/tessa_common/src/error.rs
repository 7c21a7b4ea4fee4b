//! Error types for the Tessa agent core.

use thiserror::Error;

/// Typed errors for the whole agent pipeline.
///
/// Validation and extraction errors surface immediately to the caller;
/// external-service errors pass through the retry policy first.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// The completion service returned something that could not be parsed.
    /// Carries the raw text for diagnosis.
    #[error("completion output could not be parsed: {raw}")]
    Extraction { raw: String },

    /// An unrecognized vocabulary code, bad date format, or bad name format.
    /// Raised before any external write.
    #[error("{0}")]
    Validation(String),

    /// Zero filter clauses survived compilation. Refusing to run an
    /// unbounded scan against the tracker.
    #[error("your query is too broad; specify at least one search criterion (keywords, a program, or a project)")]
    QueryTooBroad,

    /// Tracker or completion-service failure, carrying the attempted
    /// query/fields for diagnosis.
    #[error("external service failure: {context}")]
    ExternalService { context: String },

    /// Finalize was attempted on an incomplete draft.
    #[error("missing required field '{0}'")]
    MissingField(String),
}

impl AgentError {
    pub fn external(context: impl Into<String>) -> Self {
        AgentError::ExternalService {
            context: context.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AgentError::Validation(message.into())
    }

    /// Only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::ExternalService { .. })
    }
}
