//! Dual-mode TLV codec for IEEE 1905.1 CMDUs.
//!
//! One borrowed buffer holds the whole message:
//! - A 10-byte CMDU header (type, id, fragment flags, total length)
//! - A sequence of TLVs: 1-byte type, 2-byte big-endian length, value
//!
//! The same element layout code builds a message (fields zeroed in place,
//! lists grown on demand) and parses one (fields viewed in place, list
//! counts derived from the length). Nothing is copied out of the buffer.

pub mod cmdu;
pub mod element;
pub mod error;
pub mod field;
pub mod mac;
pub mod tlvs;

pub use cmdu::{Cmdu, CmduHeader, MessageType, UnknownTlv, CMDU_HEADER_LENGTH, TLV_HEADER_LENGTH};
pub use element::{Element, ElementRef, TlvElement, TlvHeader};
pub use error::{ParseMacError, Result, TlvError};
pub use field::{insert_span, swap_scalar, Field, FieldCursor, List, Mode, WireType};
pub use mac::MacAddr;
pub use tlvs::{
    InterfacePairInfo, LinkMetricInfo, NeighborDevice, ReceiverInterfacePairInfo,
    ReceiverLinkMetricInfo, Tlv, Tlv1905NeighborDevice, TlvAlMacAddress, TlvLinkMetricQuery,
    TlvLinkMetricResultCode, TlvMacAddress, TlvNon1905NeighborDeviceList, TlvReceiverLinkMetric,
    TlvTransmitterLinkMetric, TlvType, TlvVendorSpecific,
};
