/// Errors raised while framing, sending or receiving envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The header does not start with the envelope magic. The stream is out
    /// of sync and should be closed.
    #[error("corrupt envelope: bad magic {found:#010x} (expected 0xb8c16f47)")]
    CorruptEnvelope { found: u32 },

    /// The header names a message kind this crate does not know.
    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Fewer bytes than the header or a metadata record requires.
    #[error("truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The payload does not match the layout its kind requires.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An I/O error occurred while reading or writing envelopes.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

impl EnvelopeError {
    /// True when the envelope may not have reached (or come from) the peer.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Fold a transport error into the envelope error space.
pub(crate) fn from_transport(err: meshframe_transport::TransportError) -> EnvelopeError {
    use meshframe_transport::TransportError;

    match err {
        TransportError::Io(io) | TransportError::Accept(io) => EnvelopeError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            EnvelopeError::Io(source)
        }
        TransportError::Truncated { received, capacity } => EnvelopeError::Truncated {
            expected: received,
            actual: capacity,
        },
        other => EnvelopeError::Io(std::io::Error::other(other.to_string())),
    }
}
