use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_envelope, encode_envelope, Envelope, DEFAULT_MAX_PAYLOAD};
use crate::error::{EnvelopeError, Result};
use crate::messages::TransportMessage;

/// Envelope codec for `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_payload_size: usize,
}

impl EnvelopeCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = EnvelopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        decode_envelope(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(EnvelopeError::ConnectionClosed),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = EnvelopeError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let size = item.payload_len();
        if size > self.max_payload_size {
            return Err(EnvelopeError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        encode_envelope(&item, dst)
    }
}

impl Encoder<TransportMessage> for EnvelopeCodec {
    type Error = EnvelopeError;

    fn encode(&mut self, item: TransportMessage, dst: &mut BytesMut) -> Result<()> {
        let envelope = item.to_envelope()?;
        Encoder::<Envelope>::encode(self, envelope, dst)
    }
}
