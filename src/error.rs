use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipePulseError {
    #[error("Backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Push channel error: {0}")]
    PushChannel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for PipePulseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::PushChannel(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipePulseError>;
