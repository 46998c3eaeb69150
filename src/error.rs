use thiserror::Error;

#[derive(Error, Debug)]
pub enum KotobaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Vocabulary lookup error: {0}")]
    Lookup(String),

    #[error("Known words error: {0}")]
    KnownWords(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KotobaError {
    /// Cancellation is a terminal state, not a failure worth alerting on.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, KotobaError>;
