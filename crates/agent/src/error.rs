use thiserror::Error;

/// Failures along the reply → sandbox → execute → decode path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The reply could not be split. The parser recovers from this itself,
    /// so it never reaches the session.
    #[error("could not parse model response")]
    ParseFailure,

    #[error("no runnable code in the response")]
    SandboxEmpty,

    #[error("generated code failed:\n{stderr}")]
    ExecutionFailure { stderr: String },

    #[error("could not decode result: {reason}")]
    DecodeFailure { reason: String, stderr: String },

    #[error("no API key configured")]
    CredentialMissing,
}

impl PipelineError {
    /// Only execution failures go back to the model for a fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::ExecutionFailure { .. })
    }
}
