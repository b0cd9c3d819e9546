use std::io::{ErrorKind, Write};

use bytes::BytesMut;
#[cfg(unix)]
use meshframe_transport::LocalStream;
use tracing::trace;

use crate::codec::{encode_envelope, Envelope, EnvelopeConfig};
#[cfg(unix)]
use crate::error::from_transport;
use crate::error::{EnvelopeError, Result};
use crate::messages::TransportMessage;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete envelopes to any `Write` stream.
///
/// The header and every frame go out in one buffered write so a reader
/// never sees an interleaved envelope from the same writer.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: EnvelopeConfig,
}

impl<T: Write> EnvelopeWriter<T> {
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

    /// Write one envelope (blocking).
    ///
    /// A write error, an expired write timeout or a zero-length write fails
    /// with an error for which [`EnvelopeError::is_delivery_failure`] holds.
    /// The envelope may then be partially written and the stream should be
    /// closed.
    pub fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let size = envelope.payload_len();
        if size > self.config.max_payload_size {
            return Err(EnvelopeError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_envelope(envelope, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(EnvelopeError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }
        trace!(kind = %envelope.kind, len = size, "envelope sent");

        self.flush()
    }

    /// Serialize and send a typed message.
    pub fn send_message(&mut self, message: &TransportMessage) -> Result<()> {
        self.send(&message.to_envelope()?)
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }
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
impl EnvelopeWriter<LocalStream> {
    /// Writer over a local stream with the configured write timeout applied.
    pub fn with_config_local(inner: LocalStream, config: EnvelopeConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(from_transport)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::codec::{decode_envelope, MessageKind, HEADER_SIZE};

    #[test]
    fn writes_header_then_frames() {
        let mut writer = EnvelopeWriter::new(Cursor::new(Vec::<u8>::new()));
        let envelope = Envelope {
            kind: MessageKind::CmduTx,
            frames: vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")],
        };
        writer.send(&envelope).unwrap();

        let written = writer.into_inner().into_inner();
        assert_eq!(written.len(), HEADER_SIZE + 5);
        assert_eq!(&written[HEADER_SIZE..], b"abcde");

        let mut wire = BytesMut::from(written.as_slice());
        let decoded = decode_envelope(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(decoded.payload().as_ref(), b"abcde");
    }

    #[test]
    fn payload_over_limit_rejected_before_writing() {
        let cfg = EnvelopeConfig {
            max_payload_size: 4,
            ..EnvelopeConfig::default()
        };
        let mut writer = EnvelopeWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer
            .send(&Envelope::new(MessageKind::CmduTx, Bytes::from_static(b"oversized")))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::PayloadTooLarge { .. }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn zero_write_is_delivery_failure() {
        let mut writer = EnvelopeWriter::new(ZeroWriter);
        let err = writer
            .send(&Envelope::new(MessageKind::CmduTx, Bytes::from_static(b"x")))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::ConnectionClosed));
        assert!(err.is_delivery_failure());
    }

    #[test]
    fn broken_pipe_is_delivery_failure() {
        let (left, right) = LocalStream::pair().unwrap();
        drop(right);
        let mut writer = EnvelopeWriter::with_config_local(left, EnvelopeConfig::default()).unwrap();
        let err = writer
            .send(&Envelope::new(MessageKind::CmduRx, Bytes::from_static(b"lost")))
            .unwrap_err();
        assert!(err.is_delivery_failure());
    }

    #[test]
    fn write_timeout_is_delivery_failure() {
        let (left, _peer) = LocalStream::pair().unwrap();
        let cfg = EnvelopeConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..EnvelopeConfig::default()
        };
        let mut writer = EnvelopeWriter::with_config_local(left, cfg).unwrap();
        let envelope = Envelope::new(MessageKind::CmduRx, Bytes::from(vec![0u8; 4096]));

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            // The peer never reads, so the socket buffer fills up.
            let result = (0..10_000).find_map(|_| writer.send(&envelope).err());
            let _ = done_tx.send(result);
        });

        let err = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("send should give up once the write timeout expires")
            .expect("a stalled peer should fail the send");
        match &err {
            EnvelopeError::Io(io) => assert!(
                matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
                "unexpected io error: {io}"
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_delivery_failure());
    }

    #[test]
    fn interrupted_write_retries() {
        let mut writer = EnvelopeWriter::new(InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer
            .send(&Envelope::new(MessageKind::Subscribe, Bytes::from_static(b"retry")))
            .unwrap();
        assert_eq!(writer.get_ref().data.len(), HEADER_SIZE + 5);
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
