use bytes::BytesMut;
use meshframe_transport::LocalDatagram;

use crate::codec::{decode_datagram, encode_envelope, Envelope, HEADER_SIZE};
use crate::error::{from_transport, EnvelopeError, Result};
use crate::messages::TransportMessage;

/// Send one envelope as a single datagram.
pub fn send_datagram(socket: &LocalDatagram, envelope: &Envelope) -> Result<()> {
    let mut buf = BytesMut::with_capacity(envelope.wire_size());
    encode_envelope(envelope, &mut buf)?;
    socket.send(&buf).map_err(from_transport)
}

/// Receive one datagram and decode it as an envelope.
///
/// A datagram larger than `max_payload` plus the header, or one cut short,
/// is rejected.
pub fn recv_datagram(socket: &LocalDatagram, max_payload: usize) -> Result<Envelope> {
    let mut buf = vec![0u8; HEADER_SIZE + max_payload];
    let received = socket.recv(&mut buf).map_err(|err| match from_transport(err) {
        EnvelopeError::Truncated { expected, .. } => EnvelopeError::PayloadTooLarge {
            size: expected.saturating_sub(HEADER_SIZE),
            max: max_payload,
        },
        other => other,
    })?;
    decode_datagram(&buf[..received], max_payload)
}

/// Send a typed message as one datagram.
pub fn send_message_datagram(socket: &LocalDatagram, message: &TransportMessage) -> Result<()> {
    send_datagram(socket, &message.to_envelope()?)
}

/// Receive one datagram and decode its typed message.
pub fn recv_message_datagram(socket: &LocalDatagram, max_payload: usize) -> Result<TransportMessage> {
    let envelope = recv_datagram(socket, max_payload)?;
    TransportMessage::from_envelope(&envelope)
}
