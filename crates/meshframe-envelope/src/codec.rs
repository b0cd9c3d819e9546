use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{EnvelopeError, Result};

/// Envelope header: magic (4) + kind (4) + length (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Magic value opening every envelope.
pub const MAGIC: u32 = 0xB8C1_6F47;

/// Largest frame a peer allocates for one message.
pub const MAX_FRAME_LENGTH: usize = 4096;

/// Default maximum payload size.
pub const DEFAULT_MAX_PAYLOAD: usize = MAX_FRAME_LENGTH;

/// Kind of a transport message, carried in the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum MessageKind {
    CmduRx = 1,
    CmduTx = 2,
    Subscribe = 3,
    CmduTxConfirmation = 4,
    InterfaceConfigurationRequest = 5,
    AlMacAddressConfiguration = 6,
}

impl MessageKind {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::CmduRx),
            2 => Some(Self::CmduTx),
            3 => Some(Self::Subscribe),
            4 => Some(Self::CmduTxConfirmation),
            5 => Some(Self::InterfaceConfigurationRequest),
            6 => Some(Self::AlMacAddressConfiguration),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CmduRx => "cmdu_rx",
            Self::CmduTx => "cmdu_tx",
            Self::Subscribe => "subscribe",
            Self::CmduTxConfirmation => "cmdu_tx_confirmation",
            Self::InterfaceConfigurationRequest => "interface_configuration_request",
            Self::AlMacAddressConfiguration => "al_mac_address_configuration",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transport message on the wire: a kind and one or more payload frames.
///
/// The header length is the sum of the frame lengths. A received envelope
/// always holds exactly one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub frames: Vec<Bytes>,
}

impl Envelope {
    /// An envelope with a single frame.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            frames: vec![payload.into()],
        }
    }

    /// Sum of the frame lengths.
    pub fn payload_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// The total wire size (header + frames).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// The payload as one contiguous buffer.
    pub fn payload(&self) -> Bytes {
        match self.frames.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            frames => {
                let mut joined = BytesMut::with_capacity(self.payload_len());
                for frame in frames {
                    joined.extend_from_slice(frame);
                }
                joined.freeze()
            }
        }
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format (native byte order):
/// ```text
/// ┌──────────────┬────────────┬────────────┬──────────────────────┐
/// │ Magic (4B)   │ Kind (4B)  │ Length (4B)│ Frames (Length bytes)│
/// │ 0xB8C16F47   │            │            │                      │
/// └──────────────┴────────────┴────────────┴──────────────────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let len = envelope.payload_len();
    if len > u32::MAX as usize {
        return Err(EnvelopeError::PayloadTooLarge {
            size: len,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + len);
    dst.put_u32_ne(MAGIC);
    dst.put_u32_ne(envelope.kind.code());
    dst.put_u32_ne(len as u32);
    for frame in &envelope.frames {
        dst.put_slice(frame);
    }
    Ok(())
}

struct Header {
    kind: u32,
    len: usize,
}

fn parse_header(src: &[u8], max_payload: usize) -> Result<Header> {
    let mut header = &src[..HEADER_SIZE];
    let magic = header.get_u32_ne();
    if magic != MAGIC {
        warn!(found = magic, "rejecting envelope with bad magic");
        return Err(EnvelopeError::CorruptEnvelope { found: magic });
    }
    let kind = header.get_u32_ne();
    let len = header.get_u32_ne() as usize;
    if len > max_payload {
        warn!(len, max_payload, "rejecting oversized envelope");
        return Err(EnvelopeError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    Ok(Header { kind, len })
}

fn resolve_kind(code: u32) -> Result<MessageKind> {
    MessageKind::from_u32(code).ok_or_else(|| {
        warn!(kind = code, "rejecting envelope of unknown kind");
        EnvelopeError::UnknownKind(code)
    })
}

/// Decode an envelope from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer. An envelope of
/// unknown kind is consumed too, so the stream stays in sync.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = parse_header(src, max_payload)?;
    let total = HEADER_SIZE + header.len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.len).freeze();
    let kind = resolve_kind(header.kind)?;
    Ok(Some(Envelope {
        kind,
        frames: vec![payload],
    }))
}

/// Decode one whole datagram.
///
/// Unlike a stream there is no "more data later": a datagram shorter than
/// its header claims is [`EnvelopeError::Truncated`].
pub fn decode_datagram(datagram: &[u8], max_payload: usize) -> Result<Envelope> {
    if datagram.len() < HEADER_SIZE {
        return Err(EnvelopeError::Truncated {
            expected: HEADER_SIZE,
            actual: datagram.len(),
        });
    }
    let header = parse_header(datagram, max_payload)?;
    let total = HEADER_SIZE + header.len;
    if datagram.len() < total {
        return Err(EnvelopeError::Truncated {
            expected: total,
            actual: datagram.len(),
        });
    }
    if datagram.len() > total {
        return Err(EnvelopeError::Malformed(format!(
            "{} trailing bytes after envelope",
            datagram.len() - total
        )));
    }
    let kind = resolve_kind(header.kind)?;
    Ok(Envelope::new(
        kind,
        Bytes::copy_from_slice(&datagram[HEADER_SIZE..]),
    ))
}

/// Configuration for envelope readers and writers.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// Maximum payload size in bytes. Default: [`DEFAULT_MAX_PAYLOAD`].
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
