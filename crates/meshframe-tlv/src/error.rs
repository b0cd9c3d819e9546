/// Errors raised while building or parsing a CMDU.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    /// A field or list allocation needs more bytes than remain in the buffer.
    #[error("out of space: need {requested} bytes, {remaining} remaining")]
    OutOfSpace { requested: usize, remaining: usize },

    /// A variable-length list was grown after a later element claimed buffer space.
    #[error("out of order allocation on element {element}: a later element already claimed space")]
    OutOfOrder { element: usize },

    /// An element failed its consistency check.
    #[error("malformed element: {0}")]
    Malformed(&'static str),

    /// The tag read from the wire is not the one the element declares.
    #[error("type mismatch: expected tag {expected:#04x}, found {found:#04x}")]
    TypeMismatch { expected: u8, found: u8 },

    /// The element (or message) is finalized and can no longer change.
    #[error("element already finalized")]
    Finalized,

    /// The message was parsed from the wire and is read-only.
    #[error("message is read-only in parse mode")]
    ReadOnly,

    /// A list index beyond the current entry count was written.
    #[error("entry {index} not found (list holds {count} entries)")]
    EntryNotFound { index: usize, count: usize },

    /// A length does not fit the 16-bit length field.
    #[error("length {length} does not fit a 16-bit length field")]
    LengthOverflow { length: usize },

    /// An earlier fatal error invalidated the whole message.
    #[error("message aborted by an earlier error")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, TlvError>;

/// A MAC address string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(pub String);
