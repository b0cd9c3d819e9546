use std::io::{ErrorKind, Read};

use bytes::BytesMut;
#[cfg(unix)]
use meshframe_transport::LocalStream;
use tracing::trace;

use crate::codec::{decode_envelope, Envelope, EnvelopeConfig};
#[cfg(unix)]
use crate::error::from_transport;
use crate::error::{EnvelopeError, Result};
use crate::messages::TransportMessage;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete envelopes from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole envelopes.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    config: EnvelopeConfig,
}

impl<T: Read> EnvelopeReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, EnvelopeConfig::default())
    }

    pub fn with_config(inner: T, config: EnvelopeConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// EOF, at an envelope boundary or in the middle of one, is
    /// [`EnvelopeError::ConnectionClosed`]. A bad magic value leaves the
    /// stream desynchronized; the caller should drop the connection.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.config.max_payload_size)? {
                trace!(kind = %envelope.kind, len = envelope.payload_len(), "envelope received");
                return Ok(envelope);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            };

            if read == 0 {
                return Err(EnvelopeError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read the next envelope and decode its typed message.
    pub fn read_message(&mut self) -> Result<TransportMessage> {
        let envelope = self.read_envelope()?;
        TransportMessage::from_envelope(&envelope)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }
}

#[cfg(unix)]
impl EnvelopeReader<LocalStream> {
    /// Reader over a local stream with the configured read timeout applied.
    pub fn with_config_local(inner: LocalStream, config: EnvelopeConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(from_transport)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes};
    use meshframe_tlv::MacAddr;

    use super::*;
    use crate::codec::{encode_envelope, MessageKind, MAGIC};
    use crate::messages::AlMacConfiguration;
    use crate::writer::EnvelopeWriter;

    fn encoded(kind: MessageKind, payload: &'static [u8]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        encode_envelope(&Envelope::new(kind, Bytes::from_static(payload)), &mut wire).unwrap();
        wire.to_vec()
    }

    #[test]
    fn read_consecutive_envelopes() {
        let mut wire = encoded(MessageKind::CmduRx, b"one");
        wire.extend(encoded(MessageKind::Subscribe, b"two"));

        let mut reader = EnvelopeReader::new(Cursor::new(wire));
        let first = reader.read_envelope().unwrap();
        let second = reader.read_envelope().unwrap();
        assert_eq!(first.kind, MessageKind::CmduRx);
        assert_eq!(first.payload().as_ref(), b"one");
        assert_eq!(second.kind, MessageKind::Subscribe);
        assert!(matches!(
            reader.read_envelope(),
            Err(EnvelopeError::ConnectionClosed)
        ));
    }

    #[test]
    fn partial_reads_are_reassembled() {
        let reader = ByteByByteReader {
            bytes: encoded(MessageKind::CmduTx, b"slow"),
            pos: 0,
        };
        let mut reader = EnvelopeReader::new(reader);
        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope.payload().as_ref(), b"slow");
    }

    #[test]
    fn eof_mid_envelope_is_connection_closed() {
        let mut partial = BytesMut::new();
        partial.put_u32_ne(MAGIC);
        partial.put_u32_ne(1);
        partial.put_u32_ne(16);
        partial.put_slice(b"only-part");

        let mut reader = EnvelopeReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, EnvelopeError::ConnectionClosed));
        assert!(err.is_delivery_failure());
    }

    #[test]
    fn bad_magic_in_stream_is_corrupt() {
        let mut wire = encoded(MessageKind::CmduRx, b"x");
        wire[3] ^= 0x55;
        let mut reader = EnvelopeReader::new(Cursor::new(wire));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, EnvelopeError::CorruptEnvelope { .. }));
        assert!(!err.is_delivery_failure());
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(encoded(MessageKind::CmduRx, b"ok")),
        };
        let mut reader = EnvelopeReader::new(reader);
        assert_eq!(reader.read_envelope().unwrap().payload().as_ref(), b"ok");
    }

    #[test]
    fn typed_message_over_stream_pair() {
        let (left, right) = LocalStream::pair().unwrap();
        let mut writer = EnvelopeWriter::new(left);
        let mut reader =
            EnvelopeReader::with_config_local(right, EnvelopeConfig::default()).unwrap();

        let message = TransportMessage::AlMacAddressConfiguration(AlMacConfiguration {
            al_mac: MacAddr([2, 0, 0, 0, 0, 1]),
        });
        writer.send_message(&message).unwrap();
        assert_eq!(reader.read_message().unwrap(), message);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
