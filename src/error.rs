use thiserror::Error;

pub type Result<T> = std::result::Result<T, TutorError>;

#[derive(Debug, Error)]
pub enum TutorError {
    /// The provider could not be reached.
    #[error("completion provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider did not answer within the client timeout.
    #[error("completion provider timed out: {0}")]
    ProviderTimeout(String),

    /// The provider answered with a non-success status.
    #[error("completion provider error: {0}")]
    ProviderError(String),

    /// The provider answered 2xx with a body that is not a completion.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// The provider answered with no candidate or only whitespace.
    #[error("completion provider returned no text")]
    EmptyCompletion,

    #[error("message is required")]
    EmptyMessage,

    #[error("message is too long (maximum {0} characters)")]
    MessageTooLong(usize),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl TutorError {
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            TutorError::ProviderUnavailable(_)
                | TutorError::ProviderTimeout(_)
                | TutorError::ProviderError(_)
                | TutorError::MalformedResponse(_)
                | TutorError::EmptyCompletion
        )
    }
}
