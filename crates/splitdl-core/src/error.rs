//! Error types for splitdl core

use thiserror::Error;

/// Errors that can occur in splitdl core
#[derive(Debug, Error)]
pub enum SplitdlError {
    #[error("You already have a download in the queue: {0}")]
    AlreadyQueued(String),

    #[error("Download queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("File is too big, the maximum allowed size is {} MiB", mib(.limit))]
    SizeExceeded { limit: u64, fetched: u64 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Remote resource is empty")]
    EmptyResource,

    #[error("Download needs more than {} parts", u32::MAX)]
    TooManyParts,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

fn mib(bytes: &u64) -> u64 {
    bytes / (1024 * 1024)
}

impl SplitdlError {
    /// Anything that went wrong while fetching or staging bytes, other than
    /// the size ceiling
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            SplitdlError::Network(_)
                | SplitdlError::Io(_)
                | SplitdlError::InvalidUrl(_)
                | SplitdlError::ServerError { .. }
                | SplitdlError::EmptyResource
                | SplitdlError::TooManyParts
        )
    }

    /// Text safe to show to the requester. Transfer details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            SplitdlError::SizeExceeded { .. } => format!("❌ {}", self),
            _ => "❌ Failed to download file, is the link correct?".to_string(),
        }
    }
}

impl From<serde_json::Error> for SplitdlError {
    fn from(error: serde_json::Error) -> Self {
        SplitdlError::Serialization(error.to_string())
    }
}
