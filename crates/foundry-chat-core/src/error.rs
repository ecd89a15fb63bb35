//! Error types for the foundry-chat client.

use thiserror::Error;

/// Result type alias for client operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors surfaced by the chat client, config loading and env-file helpers.
///
/// Upload failures are not represented here: they end up as terminal
/// [`UploadRecord`](crate::UploadRecord) states instead of propagating.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
