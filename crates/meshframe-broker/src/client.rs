use std::path::Path;
use std::time::Duration;

use meshframe_envelope::{
    CmduMessage, Envelope, EnvelopeConfig, EnvelopeReader, EnvelopeWriter, MessageSelector,
    SubscribeMetadata, TransportMessage, MAX_SUBSCRIBE_TYPES,
};
use meshframe_tlv::{Cmdu, MacAddr};
use meshframe_transport::LocalStream;
use tracing::{debug, info};

use crate::error::Result;

/// A process attached to a running broker.
pub struct BrokerClient {
    reader: EnvelopeReader<LocalStream>,
    writer: EnvelopeWriter<LocalStream>,
}

impl BrokerClient {
    /// Connect to the broker socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_config(path, EnvelopeConfig::default())
    }

    /// Connect with explicit envelope limits and timeouts.
    pub fn connect_with_config(path: impl AsRef<Path>, config: EnvelopeConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = LocalStream::connect(path)?;
        let reader = EnvelopeReader::with_config_local(stream.try_clone()?, config.clone())?;
        let writer = EnvelopeWriter::with_config_local(stream, config)?;
        info!(?path, "connected to broker");
        Ok(Self { reader, writer })
    }

    /// Ask for every message matching `selectors`.
    ///
    /// Requests larger than one subscribe message holds are split.
    pub fn subscribe(&mut self, selectors: &[MessageSelector]) -> Result<()> {
        for chunk in selectors.chunks(MAX_SUBSCRIBE_TYPES) {
            let request = SubscribeMetadata::subscribe(chunk.iter().copied());
            self.writer
                .send_message(&TransportMessage::Subscribe(request))?;
        }
        debug!(count = selectors.len(), "subscribe sent");
        Ok(())
    }

    pub fn unsubscribe(&mut self, selectors: &[MessageSelector]) -> Result<()> {
        for chunk in selectors.chunks(MAX_SUBSCRIBE_TYPES) {
            let request = SubscribeMetadata::unsubscribe(chunk.iter().copied());
            self.writer
                .send_message(&TransportMessage::Subscribe(request))?;
        }
        debug!(count = selectors.len(), "unsubscribe sent");
        Ok(())
    }

    /// Publish a message to its subscribers.
    pub fn send(&mut self, message: &TransportMessage) -> Result<()> {
        self.writer.send_message(message)?;
        Ok(())
    }

    /// Publish a finalized CMDU for transmission to `dst`.
    pub fn send_cmdu(&mut self, cmdu: &Cmdu<'_>, dst: MacAddr) -> Result<()> {
        self.send(&TransportMessage::CmduTx(CmduMessage::from_cmdu(cmdu, dst)?))
    }

    /// Next message routed to this client (blocking up to the read timeout).
    pub fn recv(&mut self) -> Result<TransportMessage> {
        Ok(self.reader.read_message()?)
    }

    pub fn recv_envelope(&mut self) -> Result<Envelope> {
        Ok(self.reader.read_envelope()?)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Close both directions of the connection.
    pub fn shutdown(&self) -> Result<()> {
        self.writer.get_ref().shutdown()?;
        Ok(())
    }
}
