/// Result alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by the composition pipeline.
///
/// Everything except [`PipelineError::ResourceExhausted`], [`PipelineError::Validation`] and
/// [`PipelineError::Other`] is recovered at the next frame boundary by the scheduler.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Invalid configuration or API misuse.
    #[error("validation error: {0}")]
    Validation(String),

    /// A device transfer failed (completion handle reported failure, renderer failed).
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Local buffers or rectangles disagree with the agreed view state.
    #[error("state mismatch: {0}")]
    StateMismatch(String),

    /// Ranks could not agree on the frame state.
    #[error("synchronization error: {0}")]
    Sync(String),

    /// Point-to-point transport failure (timeout, disconnected peer, abort).
    #[error("communication error: {0}")]
    Comm(String),

    /// The slot pool cannot provide buffers. Halts the pipeline.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Message or configuration (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`PipelineError::Transfer`].
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    /// Build a [`PipelineError::StateMismatch`].
    pub fn state_mismatch(msg: impl Into<String>) -> Self {
        Self::StateMismatch(msg.into())
    }

    /// Build a [`PipelineError::Sync`].
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Build a [`PipelineError::Comm`].
    pub fn comm(msg: impl Into<String>) -> Self {
        Self::Comm(msg.into())
    }

    /// Build a [`PipelineError::ResourceExhausted`].
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Build a [`PipelineError::Serde`].
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// `true` when the error only affects the current frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Self::Transfer(_) | Self::StateMismatch(_) | Self::Sync(_) | Self::Comm(_) | Self::Serde(_)
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
