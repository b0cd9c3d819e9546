use crate::subscription::ClientId;

/// Errors that can occur in broker and broker client operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] meshframe_transport::TransportError),

    /// Envelope-level error.
    #[error("envelope error: {0}")]
    Envelope(#[from] meshframe_envelope::EnvelopeError),

    /// The broker already serves its maximum number of clients.
    #[error("client limit reached ({max} clients)")]
    TooManyClients { max: usize },

    /// A subscribe request would exceed the per-client selector limit.
    #[error("{client} would exceed the subscription limit ({max} selectors)")]
    SubscriptionLimit { client: ClientId, max: usize },

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl BrokerError {
    /// True when a receive gave up because the configured read timeout
    /// elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Envelope(meshframe_envelope::EnvelopeError::Io(err)) => matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
