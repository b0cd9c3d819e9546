use std::time::Duration;

use meshframe_envelope::EnvelopeConfig;
use meshframe_transport::DEFAULT_SOCKET_MODE;

/// Default number of simultaneously connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 32;

/// Default number of selectors one client may hold.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 256;

/// Default time a delivery may block on a subscriber that stopped reading.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Broker behavior configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Connections beyond this count are closed right after accept.
    pub max_clients: usize,
    pub max_subscriptions_per_client: usize,
    /// Permission bits applied to the listening socket file.
    pub socket_mode: u32,
    /// Envelope limits and timeouts for every client connection. A read
    /// timeout acts as an idle timeout: a silent client is disconnected.
    /// The write timeout bounds each delivery; a subscriber whose socket
    /// stays full for that long is disconnected. Without one a stalled
    /// subscriber blocks all routing.
    pub envelope: EnvelopeConfig,
    /// How often the accept and dispatch loops check the shutdown flag.
    pub poll_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            max_subscriptions_per_client: DEFAULT_MAX_SUBSCRIPTIONS,
            socket_mode: DEFAULT_SOCKET_MODE,
            envelope: EnvelopeConfig {
                write_timeout: Some(DEFAULT_DELIVERY_TIMEOUT),
                ..EnvelopeConfig::default()
            },
            poll_interval: Duration::from_millis(50),
        }
    }
}
