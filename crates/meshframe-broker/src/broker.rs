use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use meshframe_envelope::{
    Envelope, EnvelopeError, EnvelopeReader, EnvelopeWriter, SubscribeMetadata, SubscribeRequest,
    TransportMessage,
};
use meshframe_transport::{LocalListener, LocalStream, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::subscription::{ClientId, SubscriptionTable};

/// Counters reported when a broker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub clients_accepted: u64,
    pub clients_rejected: u64,
    pub envelopes_received: u64,
    pub envelopes_delivered: u64,
    /// Messages that were malformed or had no subscriber.
    pub envelopes_dropped: u64,
}

/// Distributes messages between the local processes attached to one socket.
///
/// Clients publish envelopes and subscribe to selectors; every message is
/// forwarded to each subscriber of its selector except the sender.
pub struct Broker {
    listener: LocalListener,
    config: BrokerConfig,
}

enum Event {
    Connected(ClientId, LocalStream),
    Envelope(ClientId, Envelope),
    Disconnected(ClientId, String),
}

impl Broker {
    /// Bind the broker socket at `path`.
    pub fn bind(path: impl AsRef<Path>, config: BrokerConfig) -> Result<Self> {
        let listener = LocalListener::bind_with_mode(path, config.socket_mode)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, config })
    }

    pub fn path(&self) -> &Path {
        self.listener.path()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Serve clients until `shutdown` is set.
    ///
    /// Connections are accepted on a dedicated thread and each client gets
    /// a reader thread; all routing and every write happen on the calling
    /// thread. On return every client connection is closed and the socket
    /// file is removed.
    pub fn run(self, shutdown: Arc<AtomicBool>) -> Result<BrokerStats> {
        let Broker { listener, config } = self;
        info!(path = ?listener.path(), max_clients = config.max_clients, "broker running");

        let (events_tx, events) = mpsc::channel();
        let accept = {
            let events = events_tx.clone();
            let shutdown = shutdown.clone();
            let poll = config.poll_interval;
            spawn_named("meshframe-accept".to_string(), move || {
                accept_loop(listener, events, shutdown, poll)
            })?
        };

        let poll = config.poll_interval;
        let mut dispatcher = Dispatcher::new(config, events_tx);
        dispatcher.serve(&events, &shutdown, poll);
        dispatcher.close_all();

        if accept.join().is_err() {
            warn!("accept thread panicked");
        }
        info!(stats = ?dispatcher.stats, "broker stopped");
        Ok(dispatcher.stats)
    }
}

fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| BrokerError::Spawn { name, source })
}

fn accept_loop(
    listener: LocalListener,
    events: Sender<Event>,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
) {
    let mut next_id = 1u64;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(stream) => {
                let id = ClientId::new(next_id);
                next_id += 1;
                if events.send(Event::Connected(id, stream)).is_err() {
                    break;
                }
            }
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(poll);
            }
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(poll);
            }
        }
    }
    debug!("accept loop stopped");
}

fn read_loop(id: ClientId, mut reader: EnvelopeReader<LocalStream>, events: Sender<Event>) {
    let reason = loop {
        match reader.read_envelope() {
            Ok(envelope) => {
                if events.send(Event::Envelope(id, envelope)).is_err() {
                    return;
                }
            }
            // Consumed whole, the stream is still in sync.
            Err(EnvelopeError::UnknownKind(code)) => {
                warn!(client = %id, code, "skipping envelope of unknown kind");
            }
            Err(EnvelopeError::ConnectionClosed) => break "closed by peer".to_string(),
            Err(err) => break err.to_string(),
        }
    };
    let _ = events.send(Event::Disconnected(id, reason));
}

struct Connection {
    writer: EnvelopeWriter<LocalStream>,
    reader: JoinHandle<()>,
}

struct Dispatcher {
    config: BrokerConfig,
    events: Sender<Event>,
    connections: BTreeMap<ClientId, Connection>,
    table: SubscriptionTable,
    stats: BrokerStats,
}

impl Dispatcher {
    fn new(config: BrokerConfig, events: Sender<Event>) -> Self {
        let table = SubscriptionTable::new(config.max_subscriptions_per_client);
        Self {
            config,
            events,
            connections: BTreeMap::new(),
            table,
            stats: BrokerStats::default(),
        }
    }

    fn serve(&mut self, events: &Receiver<Event>, shutdown: &AtomicBool, poll: Duration) {
        while !shutdown.load(Ordering::SeqCst) {
            match events.recv_timeout(poll) {
                Ok(Event::Connected(id, stream)) => self.connect(id, stream),
                Ok(Event::Envelope(id, envelope)) => self.route(id, envelope),
                Ok(Event::Disconnected(id, reason)) => self.disconnect(id, &reason),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn connect(&mut self, id: ClientId, stream: LocalStream) {
        if self.connections.len() >= self.config.max_clients {
            let err = BrokerError::TooManyClients {
                max: self.config.max_clients,
            };
            warn!(client = %id, error = %err, "closing connection");
            let _ = stream.shutdown();
            self.stats.clients_rejected += 1;
            return;
        }

        let credentials = stream.peer_credentials();
        match self.open(id, stream) {
            Ok(connection) => {
                info!(client = %id, ?credentials, "client connected");
                self.connections.insert(id, connection);
                self.stats.clients_accepted += 1;
            }
            Err(err) => {
                warn!(client = %id, error = %err, "failed to set up client");
                self.stats.clients_rejected += 1;
            }
        }
    }

    fn open(&self, id: ClientId, stream: LocalStream) -> Result<Connection> {
        // Some platforms hand out accepted sockets with the listener's
        // non-blocking flag.
        stream.set_nonblocking(false)?;
        let reader =
            EnvelopeReader::with_config_local(stream.try_clone()?, self.config.envelope.clone())?;
        let writer = EnvelopeWriter::with_config_local(stream, self.config.envelope.clone())?;
        let events = self.events.clone();
        let reader = spawn_named(format!("meshframe-{id}"), move || {
            read_loop(id, reader, events)
        })?;
        Ok(Connection { writer, reader })
    }

    fn route(&mut self, sender: ClientId, envelope: Envelope) {
        self.stats.envelopes_received += 1;

        let message = match TransportMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(err) => {
                warn!(client = %sender, kind = %envelope.kind, error = %err, "dropping malformed message");
                self.stats.envelopes_dropped += 1;
                return;
            }
        };

        if let TransportMessage::Subscribe(request) = &message {
            self.update_subscriptions(sender, request);
            return;
        }

        let selector = message.selector();
        let recipients = self.table.recipients(selector, sender);
        if recipients.is_empty() {
            trace!(client = %sender, %selector, "no subscribers");
            self.stats.envelopes_dropped += 1;
            return;
        }

        let mut failed = Vec::new();
        for id in recipients {
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };
            match connection.writer.send(&envelope) {
                Ok(()) => {
                    trace!(from = %sender, to = %id, %selector, "delivered");
                    self.stats.envelopes_delivered += 1;
                }
                Err(err) => {
                    warn!(client = %id, error = %err, "delivery failed");
                    failed.push(id);
                }
            }
        }
        for id in failed {
            self.disconnect(id, "delivery failed");
        }
    }

    fn update_subscriptions(&mut self, client: ClientId, request: &SubscribeMetadata) {
        match request.request {
            SubscribeRequest::Subscribe => match self.table.subscribe(client, &request.selectors) {
                Ok(added) => debug!(%client, added, "subscribed"),
                Err(err) => warn!(%client, error = %err, "subscribe rejected"),
            },
            SubscribeRequest::Unsubscribe => {
                let removed = self.table.unsubscribe(client, &request.selectors);
                debug!(%client, removed, "unsubscribed");
            }
        }
    }

    /// Close a client connection and forget its subscriptions. Unknown ids
    /// (already closed) are ignored.
    fn disconnect(&mut self, id: ClientId, reason: &str) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };
        let dropped = self.table.drop_client(id);
        if let Err(err) = connection.writer.get_ref().shutdown() {
            debug!(client = %id, error = %err, "shutdown failed");
        }
        if connection.reader.join().is_err() {
            warn!(client = %id, "reader thread panicked");
        }
        info!(client = %id, reason, subscriptions = dropped, "client disconnected");
    }

    fn close_all(&mut self) {
        let ids: Vec<ClientId> = self.connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id, "broker shutting down");
        }
    }
}
