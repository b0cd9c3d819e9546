//! Transport envelopes and typed messages for local meshframe IPC.
//!
//! Every message exchanged between cooperating processes is wrapped in a
//! 12-byte envelope header:
//! - a 4-byte magic value (`0xB8C16F47`) for stream synchronization
//! - a 4-byte message kind
//! - a 4-byte payload length
//!
//! Header fields are in host byte order; peers always share one machine.
//! The payload is a fixed metadata record followed, for CMDU messages, by
//! the raw CMDU bytes.

pub mod codec;
#[cfg(unix)]
pub mod datagram;
pub mod error;
pub mod messages;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_datagram, decode_envelope, encode_envelope, Envelope, EnvelopeConfig, MessageKind,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC, MAX_FRAME_LENGTH,
};
#[cfg(unix)]
pub use datagram::{recv_datagram, recv_message_datagram, send_datagram, send_message_datagram};
pub use error::{EnvelopeError, Result};
pub use messages::{
    AlMacConfiguration, CmduMessage, CmduMetadata, InterfaceConfiguration, InterfaceType,
    MessageSelector, SubscribeMetadata, SubscribeRequest, TransportMessage,
    TxConfirmationMetadata, ETHER_TYPE_1905, ETHER_TYPE_LLDP, IF_NAMESIZE, MAX_SUBSCRIBE_TYPES,
    METADATA_VERSION,
};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;

#[cfg(feature = "async")]
pub use async_codec::EnvelopeCodec;
