//! IEEE 1905.1 messaging for multi-AP mesh devices.
//!
//! meshframe builds and parses CMDUs in place over a caller-owned buffer and
//! carries them between the processes of one device.
//!
//! # Crate Structure
//!
//! - [`tlv`]: dual-mode CMDU/TLV codec over a borrowed buffer
//! - [`transport`]: Unix domain socket streams, listeners and datagrams
//! - [`envelope`]: transport envelope framing and typed IPC messages
//! - [`broker`]: local publish/subscribe broker (behind `broker` feature)

/// Re-export codec types.
pub mod tlv {
    pub use meshframe_tlv::*;
}

/// Re-export transport types.
pub mod transport {
    pub use meshframe_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use meshframe_envelope::*;
}

/// Re-export broker types (requires `broker` feature).
#[cfg(feature = "broker")]
pub mod broker {
    pub use meshframe_broker::*;
}
