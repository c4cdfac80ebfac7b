//! Error types for the Antrea operator

use thiserror::Error;

/// Main error type for operator reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A configuration blob could not be parsed as structured data
    #[error("parse error: {0}")]
    Parse(String),

    /// The merged configuration failed semantic validation.
    ///
    /// The message aggregates every violation found in the pass, not just
    /// the first one.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Rendering the manifest templates failed
    #[error("render error: {0}")]
    Render(String),

    /// Applying a rendered object to the cluster failed
    #[error("apply error: {0}")]
    Apply(String),

    /// Failure reconstructing prior applied state from the live cluster
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a render error with the given message
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create an apply error with the given message
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Aggregate a list of validation violations into a single error.
    ///
    /// Callers must not assume only one problem is ever reported at a time.
    pub fn validation_errors(errs: Vec<String>) -> Self {
        Self::Validation(format!("[{}]", errs.join(", ")))
    }
}
