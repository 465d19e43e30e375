//! Error types for atom-light-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{state}: {message}")]
    Submission { state: String, message: String },

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// The terminal error every stream receives when the underlying socket
    /// goes away.
    pub fn socket_closed() -> Self {
        ClientError::Socket("Socket closed".to_string())
    }
}
