use thiserror::Error;

/// Failures talking to the scrape backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// No usable answer after the transport's own retries
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid backend configuration: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Definitive failures end a job; anything else is a transient poll error
    pub fn is_definitive(&self) -> bool {
        matches!(self, BackendError::Http { .. } | BackendError::Configuration(_))
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Http { message, .. } if !message.is_empty() => message.clone(),
            BackendError::Http { status, .. } => format!("Server returned HTTP {status}"),
            BackendError::Transport(_) => "Could not reach the server".to_string(),
            BackendError::Decode(_) => "The server sent an unexpected response".to_string(),
            BackendError::Configuration(msg) => msg.clone(),
        }
    }
}

impl From<reqwest_middleware::Error> for BackendError {
    fn from(err: reqwest_middleware::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}
