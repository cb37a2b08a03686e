use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("server returned status {status}")]
    Status { status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A change event whose row does not match the table's shape.
    #[error("invalid {table} payload: {reason}")]
    InvalidPayload { table: &'static str, reason: String },

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
