//! Local publish/subscribe distribution of meshframe messages.
//!
//! Processes on one device attach to a broker socket, subscribe to message
//! selectors and publish envelopes. The broker forwards every message to the
//! subscribers of its selector, never back to the sender:
//! - received CMDUs are keyed by their IEEE 1905.1 message type
//! - outgoing CMDUs and control messages are keyed by message kind

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod subscription;

pub use broker::{Broker, BrokerStats};
pub use client::BrokerClient;
pub use config::{
    BrokerConfig, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_SUBSCRIPTIONS,
};
pub use error::{BrokerError, Result};
pub use subscription::{ClientId, SubscriptionTable};
