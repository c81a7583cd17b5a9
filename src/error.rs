use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Every failure the client can surface. None of these are fatal to the
/// process; each one maps to a feature becoming unavailable until the user
/// retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// Microphone access was denied or no input device is available.
    #[error("microphone unavailable: {0}")]
    Permission(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("recording captured no audio")]
    EmptyCapture,
    #[error("failed to encode recording: {0}")]
    Encoding(String),
    #[error("server returned {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("live channel error: {0}")]
    Connection(String),
    /// A frame or response body that could not be decoded.
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("settings error: {0}")]
    Config(String),
    #[error("no active conversation")]
    NoConversation,
    #[error("{0}")]
    InvalidState(String),
}

impl ClientError {
    /// Transient request failures the user may retry by hand.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::Http {
                status: status.as_u16(),
                detail: err.to_string(),
            }
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}
