use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A required piece of configuration could not be resolved
    /// (chat config, `model`, `model_inference`, or the model path).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported inference backend `{kind}`: {reason}")]
    UnsupportedInference { kind: String, reason: String },

    /// A load or a generation run is already in flight.
    #[error("session is busy")]
    Busy,

    #[error("engine worker is gone")]
    EngineGone,

    #[error("failed to spawn engine worker: {0}")]
    Spawn(std::io::Error),

    #[error("message index {0} out of range")]
    BadIndex(usize),

    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid conversation name: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
