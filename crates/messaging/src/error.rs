use thiserror::Error;

/// Errors that can occur in the messaging layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker could not accept the publish, even after the
    /// publisher's own retries. The caller decides whether this is
    /// fatal to the request or deferred.
    #[error("publisher unavailable: {0}")]
    PublishUnavailable(String),

    /// An event payload could not be serialized into, or out of, the
    /// envelope's JSON body.
    #[error("event payload codec failure: {0}")]
    Decode(#[from] serde_json::Error),

    /// A queue was referenced before being declared.
    #[error("queue not declared: {0}")]
    UnknownQueue(String),

    /// A queue was declared twice with a live consumer attached.
    #[error("queue already declared: {0}")]
    QueueAlreadyDeclared(String),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
