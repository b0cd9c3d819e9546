//! Local socket transport for meshframe.
//!
//! Cooperating processes on one device exchange envelopes over Unix domain
//! sockets:
//! - [`LocalListener`] / [`LocalStream`]: connection-oriented byte streams
//! - [`LocalDatagram`]: one envelope per datagram
//!
//! This is the lowest layer; the envelope codec and the broker build on it.

pub mod error;

#[cfg(unix)]
pub mod datagram;
#[cfg(unix)]
pub mod listener;
#[cfg(unix)]
pub mod stream;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use datagram::LocalDatagram;
#[cfg(unix)]
pub use listener::{LocalListener, DEFAULT_SOCKET_MODE};
#[cfg(unix)]
pub use stream::{LocalStream, PeerCredentials};
