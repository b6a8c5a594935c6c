//! Publisher error types.

use thiserror::Error;

/// Failures inside a publisher. They never leave the publisher: `connect`
/// folds them into a `bool` and `publish` into a [`crate::PublishResult`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("ui error: {0}")]
    Ui(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        // Bot API URLs embed the token.
        PublishError::Transport(err.without_url().to_string())
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Transport(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for PublishError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        PublishError::Transport(format!("CDP: {}", err))
    }
}
