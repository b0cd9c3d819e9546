//! Typed transport messages and their metadata records.
//!
//! Every record is packed, native byte order, and opens with a version byte
//! (currently 0). CMDU messages append the CMDU bytes after the metadata.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshframe_tlv::{Cmdu, MacAddr};

use crate::codec::{Envelope, MessageKind};
use crate::error::{EnvelopeError, Result};

/// Version byte that opens every metadata record.
pub const METADATA_VERSION: u8 = 0;

/// Maximum number of selectors in one subscribe request.
pub const MAX_SUBSCRIBE_TYPES: usize = 64;

/// IEEE 1905.1 ether type.
pub const ETHER_TYPE_1905: u16 = 0x893A;
/// LLDP ether type.
pub const ETHER_TYPE_LLDP: u16 = 0x88CC;

/// Interface name field width, NUL terminator included.
pub const IF_NAMESIZE: usize = 16;

/// Routing key of a message in the publish/subscribe scheme.
///
/// Bit 0: internal (control message) vs external (CMDU). Bit 1: vendor
/// specific. Bits 2-15: reserved, always zero. Bits 16-31: opcode, the
/// CMDU message type or the internal message kind code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageSelector(u32);

impl MessageSelector {
    const INTERNAL: u32 = 1 << 0;
    const VENDOR_SPECIFIC: u32 = 1 << 1;
    const RESERVED: u32 = 0x0000_FFFC;
    const OPCODE_SHIFT: u32 = 16;

    /// Selector for CMDUs of the given message type.
    pub fn external(message_type: u16) -> Self {
        Self((message_type as u32) << Self::OPCODE_SHIFT)
    }

    /// Selector for vendor specific CMDUs of the given message type.
    pub fn vendor_specific(message_type: u16) -> Self {
        Self(Self::external(message_type).0 | Self::VENDOR_SPECIFIC)
    }

    /// Selector for an internal control message kind.
    pub fn internal(kind: MessageKind) -> Self {
        Self(((kind.code() & 0xFFFF) << Self::OPCODE_SHIFT) | Self::INTERNAL)
    }

    /// From the raw 32-bit wire value; reserved bits are cleared.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & !Self::RESERVED)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_internal(self) -> bool {
        self.0 & Self::INTERNAL != 0
    }

    pub fn is_vendor_specific(self) -> bool {
        self.0 & Self::VENDOR_SPECIFIC != 0
    }

    pub fn opcode(self) -> u16 {
        (self.0 >> Self::OPCODE_SHIFT) as u16
    }
}

impl fmt::Display for MessageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match (self.is_internal(), self.is_vendor_specific()) {
            (true, _) => "internal",
            (false, true) => "vendor",
            (false, false) => "cmdu",
        };
        write!(f, "{scope}:{:#06x}", self.opcode())
    }
}

/// Interface class a CMDU was received on or should be sent on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum InterfaceType {
    #[default]
    None = 0,
    Net = 1,
    LocalBus = 2,
    Tunnel = 3,
}

impl InterfaceType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Net),
            2 => Some(Self::LocalBus),
            3 => Some(Self::Tunnel),
            _ => None,
        }
    }
}

/// Metadata of a received or to-be-sent CMDU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmduMetadata {
    /// Caller chosen value echoed back in the send confirmation.
    pub cookie: u16,
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ether_type: u16,
    /// IEEE 1905.1 message type.
    pub msg_type: u16,
    pub relay: bool,
    /// The message id in the CMDU header is already set (replies).
    pub preset_message_id: bool,
    pub if_type: InterfaceType,
    /// Interface index, 0 lets the transport decide.
    pub if_index: u32,
    /// Seconds since the epoch at reception.
    pub received_time: u64,
}

impl CmduMetadata {
    /// Packed size: version, cookie, dst, src, ether type, message type,
    /// flags, interface type, interface index, length, receive time.
    pub const SIZE: usize = 35;

    const RELAY: u8 = 1 << 0;
    const PRESET_MESSAGE_ID: u8 = 1 << 1;

    /// Metadata for sending `cmdu` as a 1905 frame to `dst`.
    pub fn for_cmdu(cmdu: &Cmdu<'_>, dst: MacAddr) -> Self {
        Self {
            dst,
            ether_type: ETHER_TYPE_1905,
            msg_type: cmdu.message_type(),
            relay: cmdu.relay_indicator(),
            ..Self::default()
        }
    }
}

/// A CMDU together with its transport metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmduMessage {
    pub metadata: CmduMetadata,
    /// CMDU bytes, 1905 header included.
    pub cmdu: Bytes,
}

impl CmduMessage {
    /// Copy the occupied bytes of a finalized CMDU.
    ///
    /// The CMDU must be finalized and in wire order; anything else is
    /// `Malformed` and nothing is copied.
    pub fn from_cmdu(cmdu: &Cmdu<'_>, dst: MacAddr) -> Result<Self> {
        if !cmdu.is_finalized() {
            return Err(EnvelopeError::Malformed("CMDU is not finalized".into()));
        }
        if !cmdu.is_swapped() {
            return Err(EnvelopeError::Malformed("CMDU is not in wire order".into()));
        }
        Ok(Self {
            metadata: CmduMetadata::for_cmdu(cmdu, dst),
            cmdu: Bytes::copy_from_slice(cmdu.as_bytes()),
        })
    }
}

/// Whether a subscribe message adds or removes selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscribeRequest {
    Subscribe = 1,
    Unsubscribe = 2,
}

/// A subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeMetadata {
    pub request: SubscribeRequest,
    pub selectors: Vec<MessageSelector>,
}

impl SubscribeMetadata {
    /// Fixed part: version, request type, selector count.
    pub const FIXED_SIZE: usize = 3;

    pub fn subscribe(selectors: impl IntoIterator<Item = MessageSelector>) -> Self {
        Self {
            request: SubscribeRequest::Subscribe,
            selectors: selectors.into_iter().collect(),
        }
    }

    pub fn unsubscribe(selectors: impl IntoIterator<Item = MessageSelector>) -> Self {
        Self {
            request: SubscribeRequest::Unsubscribe,
            selectors: selectors.into_iter().collect(),
        }
    }

    pub fn wire_size(&self) -> usize {
        Self::FIXED_SIZE + 4 * self.selectors.len()
    }
}

/// Confirmation sent back for a `CmduTx` message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConfirmationMetadata {
    /// Copied from the triggering `CmduTx`.
    pub cookie: u16,
    pub ether_type: u16,
    pub msg_type: u16,
    /// Message id the CMDU was sent with.
    pub msg_id: u16,
}

impl TxConfirmationMetadata {
    pub const SIZE: usize = 9;
}

/// Request to add an interface to, or remove it from, the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfiguration {
    /// Bridge the interface is in, empty if none.
    pub bridge_name: String,
    pub iface_name: String,
    pub is_bridge: bool,
    /// `true` adds the interface, `false` removes it.
    pub add: bool,
}

impl InterfaceConfiguration {
    pub const SIZE: usize = 1 + 2 * IF_NAMESIZE + 2;
}

/// Configures the AL MAC address the transport stamps on outgoing CMDUs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlMacConfiguration {
    pub al_mac: MacAddr,
}

impl AlMacConfiguration {
    pub const SIZE: usize = 7;
}

/// A typed transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    CmduRx(CmduMessage),
    CmduTx(CmduMessage),
    Subscribe(SubscribeMetadata),
    CmduTxConfirmation(TxConfirmationMetadata),
    InterfaceConfigurationRequest(InterfaceConfiguration),
    AlMacAddressConfiguration(AlMacConfiguration),
}

impl TransportMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::CmduRx(_) => MessageKind::CmduRx,
            Self::CmduTx(_) => MessageKind::CmduTx,
            Self::Subscribe(_) => MessageKind::Subscribe,
            Self::CmduTxConfirmation(_) => MessageKind::CmduTxConfirmation,
            Self::InterfaceConfigurationRequest(_) => MessageKind::InterfaceConfigurationRequest,
            Self::AlMacAddressConfiguration(_) => MessageKind::AlMacAddressConfiguration,
        }
    }

    /// Routing key: received CMDUs by message type, everything else (outgoing
    /// CMDUs included) by kind.
    pub fn selector(&self) -> MessageSelector {
        match self {
            Self::CmduRx(msg) => {
                if msg.metadata.msg_type == meshframe_tlv::MessageType::VendorSpecific.as_u16() {
                    MessageSelector::vendor_specific(msg.metadata.msg_type)
                } else {
                    MessageSelector::external(msg.metadata.msg_type)
                }
            }
            other => MessageSelector::internal(other.kind()),
        }
    }

    /// Serialize into a single-frame envelope.
    pub fn to_envelope(&self) -> Result<Envelope> {
        let mut buf = BytesMut::new();
        match self {
            Self::CmduRx(msg) | Self::CmduTx(msg) => put_cmdu(&mut buf, msg)?,
            Self::Subscribe(meta) => put_subscribe(&mut buf, meta)?,
            Self::CmduTxConfirmation(meta) => {
                buf.put_u8(METADATA_VERSION);
                buf.put_u16_ne(meta.cookie);
                buf.put_u16_ne(meta.ether_type);
                buf.put_u16_ne(meta.msg_type);
                buf.put_u16_ne(meta.msg_id);
            }
            Self::InterfaceConfigurationRequest(meta) => {
                buf.put_u8(METADATA_VERSION);
                put_if_name(&mut buf, &meta.bridge_name)?;
                put_if_name(&mut buf, &meta.iface_name)?;
                buf.put_u8(u8::from(meta.is_bridge));
                buf.put_u8(u8::from(meta.add));
            }
            Self::AlMacAddressConfiguration(meta) => {
                buf.put_u8(METADATA_VERSION);
                buf.put_slice(&meta.al_mac.octets());
            }
        }
        Ok(Envelope::new(self.kind(), buf.freeze()))
    }

    /// Reconstruct a typed message from a received envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let payload = envelope.payload();
        let message = match envelope.kind {
            MessageKind::CmduRx => Self::CmduRx(get_cmdu(payload)?),
            MessageKind::CmduTx => Self::CmduTx(get_cmdu(payload)?),
            MessageKind::Subscribe => Self::Subscribe(get_subscribe(payload)?),
            MessageKind::CmduTxConfirmation => {
                let mut buf = open_exact(payload, TxConfirmationMetadata::SIZE)?;
                Self::CmduTxConfirmation(TxConfirmationMetadata {
                    cookie: buf.get_u16_ne(),
                    ether_type: buf.get_u16_ne(),
                    msg_type: buf.get_u16_ne(),
                    msg_id: buf.get_u16_ne(),
                })
            }
            MessageKind::InterfaceConfigurationRequest => {
                let mut buf = open_exact(payload, InterfaceConfiguration::SIZE)?;
                let bridge_name = get_if_name(&mut buf)?;
                let iface_name = get_if_name(&mut buf)?;
                Self::InterfaceConfigurationRequest(InterfaceConfiguration {
                    bridge_name,
                    iface_name,
                    is_bridge: buf.get_u8() != 0,
                    add: buf.get_u8() != 0,
                })
            }
            MessageKind::AlMacAddressConfiguration => {
                let mut buf = open_exact(payload, AlMacConfiguration::SIZE)?;
                Self::AlMacAddressConfiguration(AlMacConfiguration {
                    al_mac: get_mac(&mut buf),
                })
            }
        };
        Ok(message)
    }
}

/// Like [`open_record`], for records that carry nothing after the fixed part.
fn open_exact(payload: Bytes, size: usize) -> Result<Bytes> {
    if payload.len() > size {
        return Err(EnvelopeError::Malformed(format!(
            "{} bytes after a {size}-byte record",
            payload.len() - size
        )));
    }
    open_record(payload, size)
}

/// Check the size and version of a fixed-size record and skip the version.
fn open_record(payload: Bytes, size: usize) -> Result<Bytes> {
    if payload.len() < size {
        return Err(EnvelopeError::Truncated {
            expected: size,
            actual: payload.len(),
        });
    }
    let mut buf = payload;
    let version = buf.get_u8();
    if version != METADATA_VERSION {
        return Err(EnvelopeError::Malformed(format!(
            "unsupported metadata version {version}"
        )));
    }
    Ok(buf)
}

fn get_mac(buf: &mut Bytes) -> MacAddr {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddr(octets)
}

fn put_cmdu(buf: &mut BytesMut, msg: &CmduMessage) -> Result<()> {
    let length = u16::try_from(msg.cmdu.len()).map_err(|_| EnvelopeError::PayloadTooLarge {
        size: msg.cmdu.len(),
        max: u16::MAX as usize,
    })?;
    let meta = &msg.metadata;
    let mut flags = 0u8;
    if meta.relay {
        flags |= CmduMetadata::RELAY;
    }
    if meta.preset_message_id {
        flags |= CmduMetadata::PRESET_MESSAGE_ID;
    }

    buf.reserve(CmduMetadata::SIZE + msg.cmdu.len());
    buf.put_u8(METADATA_VERSION);
    buf.put_u16_ne(meta.cookie);
    buf.put_slice(&meta.dst.octets());
    buf.put_slice(&meta.src.octets());
    buf.put_u16_ne(meta.ether_type);
    buf.put_u16_ne(meta.msg_type);
    buf.put_u8(flags);
    buf.put_u8(meta.if_type as u8);
    buf.put_u32_ne(meta.if_index);
    buf.put_u16_ne(length);
    buf.put_u64_ne(meta.received_time);
    buf.put_slice(&msg.cmdu);
    Ok(())
}

fn get_cmdu(payload: Bytes) -> Result<CmduMessage> {
    let mut buf = open_record(payload, CmduMetadata::SIZE)?;
    let cookie = buf.get_u16_ne();
    let dst = get_mac(&mut buf);
    let src = get_mac(&mut buf);
    let ether_type = buf.get_u16_ne();
    let msg_type = buf.get_u16_ne();
    let flags = buf.get_u8();
    let if_type = buf.get_u8();
    let if_type = InterfaceType::from_u8(if_type)
        .ok_or_else(|| EnvelopeError::Malformed(format!("unknown interface type {if_type}")))?;
    let if_index = buf.get_u32_ne();
    let length = buf.get_u16_ne() as usize;
    let received_time = buf.get_u64_ne();

    if buf.len() < length {
        return Err(EnvelopeError::Truncated {
            expected: CmduMetadata::SIZE + length,
            actual: CmduMetadata::SIZE + buf.len(),
        });
    }
    if buf.len() > length {
        return Err(EnvelopeError::Malformed(format!(
            "CMDU length {length} does not cover {} payload bytes",
            buf.len()
        )));
    }

    Ok(CmduMessage {
        metadata: CmduMetadata {
            cookie,
            dst,
            src,
            ether_type,
            msg_type,
            relay: flags & CmduMetadata::RELAY != 0,
            preset_message_id: flags & CmduMetadata::PRESET_MESSAGE_ID != 0,
            if_type,
            if_index,
            received_time,
        },
        cmdu: buf,
    })
}

fn put_subscribe(buf: &mut BytesMut, meta: &SubscribeMetadata) -> Result<()> {
    if meta.selectors.len() > MAX_SUBSCRIBE_TYPES {
        return Err(EnvelopeError::Malformed(format!(
            "{} selectors exceed the limit of {MAX_SUBSCRIBE_TYPES}",
            meta.selectors.len()
        )));
    }
    buf.reserve(meta.wire_size());
    buf.put_u8(METADATA_VERSION);
    buf.put_u8(meta.request as u8);
    buf.put_u8(meta.selectors.len() as u8);
    for selector in &meta.selectors {
        buf.put_u32_ne(selector.raw());
    }
    Ok(())
}

fn get_subscribe(payload: Bytes) -> Result<SubscribeMetadata> {
    let mut buf = open_record(payload, SubscribeMetadata::FIXED_SIZE)?;
    let request = match buf.get_u8() {
        1 => SubscribeRequest::Subscribe,
        2 => SubscribeRequest::Unsubscribe,
        other => {
            return Err(EnvelopeError::Malformed(format!(
                "invalid subscribe request type {other}"
            )))
        }
    };
    let count = buf.get_u8() as usize;
    if count > MAX_SUBSCRIBE_TYPES {
        return Err(EnvelopeError::Malformed(format!(
            "{count} selectors exceed the limit of {MAX_SUBSCRIBE_TYPES}"
        )));
    }
    if buf.len() < 4 * count {
        return Err(EnvelopeError::Truncated {
            expected: SubscribeMetadata::FIXED_SIZE + 4 * count,
            actual: SubscribeMetadata::FIXED_SIZE + buf.len(),
        });
    }
    if buf.len() > 4 * count {
        return Err(EnvelopeError::Malformed(format!(
            "{} bytes after {count} selectors",
            buf.len() - 4 * count
        )));
    }
    let selectors = (0..count)
        .map(|_| MessageSelector::from_raw(buf.get_u32_ne()))
        .collect();
    Ok(SubscribeMetadata { request, selectors })
}

fn put_if_name(buf: &mut BytesMut, name: &str) -> Result<()> {
    if name.len() >= IF_NAMESIZE || name.as_bytes().contains(&0) {
        return Err(EnvelopeError::Malformed(format!(
            "invalid interface name {name:?}"
        )));
    }
    let mut field = [0u8; IF_NAMESIZE];
    field[..name.len()].copy_from_slice(name.as_bytes());
    buf.put_slice(&field);
    Ok(())
}

fn get_if_name(buf: &mut Bytes) -> Result<String> {
    let mut field = [0u8; IF_NAMESIZE];
    buf.copy_to_slice(&mut field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(IF_NAMESIZE);
    String::from_utf8(field[..end].to_vec())
        .map_err(|_| EnvelopeError::Malformed("interface name is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0A]);

    #[test]
    fn selector_bits() {
        let sel = MessageSelector::external(0x0006);
        assert_eq!(sel.raw(), 0x0006_0000);
        assert!(!sel.is_internal());
        assert_eq!(sel.opcode(), 0x0006);

        let vendor = MessageSelector::vendor_specific(0x0004);
        assert_eq!(vendor.raw(), 0x0004_0002);
        assert!(vendor.is_vendor_specific());

        let internal = MessageSelector::internal(MessageKind::CmduTxConfirmation);
        assert_eq!(internal.raw(), 0x0004_0001);
        assert_eq!(internal.to_string(), "internal:0x0004");

        assert_eq!(MessageSelector::from_raw(0x0006_FFFC), sel);
    }

    #[test]
    fn cmdu_metadata_layout() {
        let msg = CmduMessage {
            metadata: CmduMetadata {
                cookie: 0x1234,
                dst: MacAddr::IEEE1905_MULTICAST,
                src: AGENT,
                ether_type: ETHER_TYPE_1905,
                msg_type: 0x0002,
                relay: true,
                preset_message_id: false,
                if_type: InterfaceType::Net,
                if_index: 3,
                received_time: 1_700_000_000,
            },
            cmdu: Bytes::from_static(&[0xAA; 12]),
        };
        let message = TransportMessage::CmduTx(msg.clone());
        let envelope = message.to_envelope().unwrap();
        assert_eq!(envelope.kind, MessageKind::CmduTx);
        let payload = envelope.payload();
        assert_eq!(payload.len(), CmduMetadata::SIZE + 12);
        assert_eq!(payload[0], 0);
        assert_eq!(&payload[1..3], &0x1234u16.to_ne_bytes());
        assert_eq!(&payload[3..9], &MacAddr::IEEE1905_MULTICAST.octets());
        assert_eq!(payload[19], 0x01);
        assert_eq!(payload[20], 1);
        assert_eq!(&payload[25..27], &12u16.to_ne_bytes());

        let decoded = TransportMessage::from_envelope(&envelope).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(
            decoded.selector(),
            MessageSelector::internal(MessageKind::CmduTx)
        );
        assert_eq!(
            TransportMessage::CmduRx(msg).selector(),
            MessageSelector::external(0x0002)
        );
    }

    #[test]
    fn cmdu_length_mismatch_is_rejected() {
        let msg = CmduMessage {
            metadata: CmduMetadata::default(),
            cmdu: Bytes::from_static(b"0123456789"),
        };
        let envelope = TransportMessage::CmduRx(msg).to_envelope().unwrap();
        let payload = envelope.payload();

        let short = Envelope::new(MessageKind::CmduRx, payload.slice(..payload.len() - 1));
        assert!(matches!(
            TransportMessage::from_envelope(&short),
            Err(EnvelopeError::Truncated { .. })
        ));

        let mut long = BytesMut::from(payload.as_ref());
        long.put_u8(0);
        let long = Envelope::new(MessageKind::CmduRx, long.freeze());
        assert!(matches!(
            TransportMessage::from_envelope(&long),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn subscribe_round_trip_and_size() {
        let meta = SubscribeMetadata::subscribe([
            MessageSelector::external(0x0001),
            MessageSelector::external(0x0003),
            MessageSelector::internal(MessageKind::CmduTxConfirmation),
        ]);
        let envelope = TransportMessage::Subscribe(meta.clone())
            .to_envelope()
            .unwrap();
        assert_eq!(envelope.payload_len(), 3 + 4 * 3);
        assert_eq!(meta.wire_size(), 15);
        let decoded = TransportMessage::from_envelope(&envelope).unwrap();
        assert_eq!(decoded, TransportMessage::Subscribe(meta));
    }

    #[test]
    fn subscribe_limit_enforced() {
        let selectors = (0..=MAX_SUBSCRIBE_TYPES as u16).map(MessageSelector::external);
        let meta = SubscribeMetadata::subscribe(selectors);
        assert!(matches!(
            TransportMessage::Subscribe(meta).to_envelope(),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn subscribe_with_missing_selectors_is_truncated() {
        let payload = Bytes::from_static(&[0, 1, 2, 0, 0, 1, 0]);
        let envelope = Envelope::new(MessageKind::Subscribe, payload);
        assert!(matches!(
            TransportMessage::from_envelope(&envelope),
            Err(EnvelopeError::Truncated {
                expected: 11,
                actual: 7
            })
        ));
    }

    #[test]
    fn fixed_records_have_expected_sizes() {
        let confirmation = TransportMessage::CmduTxConfirmation(TxConfirmationMetadata {
            cookie: 7,
            ether_type: ETHER_TYPE_1905,
            msg_type: 0x0003,
            msg_id: 0x0102,
        });
        let iface = TransportMessage::InterfaceConfigurationRequest(InterfaceConfiguration {
            bridge_name: "br-lan".to_string(),
            iface_name: "wlan0".to_string(),
            is_bridge: false,
            add: true,
        });
        let al_mac = TransportMessage::AlMacAddressConfiguration(AlMacConfiguration {
            al_mac: AGENT,
        });

        for (message, size) in [
            (confirmation, TxConfirmationMetadata::SIZE),
            (iface, InterfaceConfiguration::SIZE),
            (al_mac, AlMacConfiguration::SIZE),
        ] {
            let envelope = message.to_envelope().unwrap();
            assert_eq!(envelope.payload_len(), size);
            assert_eq!(TransportMessage::from_envelope(&envelope).unwrap(), message);
            assert!(message.selector().is_internal());
        }
        assert_eq!(InterfaceConfiguration::SIZE, 35);
    }

    #[test]
    fn interface_name_must_fit() {
        let iface = TransportMessage::InterfaceConfigurationRequest(InterfaceConfiguration {
            iface_name: "a-very-long-ifname".to_string(),
            ..InterfaceConfiguration::default()
        });
        assert!(matches!(
            iface.to_envelope(),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn unsupported_version_rejected() {
        let envelope = Envelope::new(
            MessageKind::AlMacAddressConfiguration,
            Bytes::from_static(&[1, 0, 0, 0, 0, 0, 0]),
        );
        assert!(matches!(
            TransportMessage::from_envelope(&envelope),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn metadata_from_cmdu() {
        let mut buf = [0u8; 32];
        let mut cmdu = Cmdu::create(&mut buf, 0x0001, 5).unwrap();
        cmdu.set_relay_indicator(true).unwrap();
        cmdu.finalize().unwrap();

        let msg = CmduMessage::from_cmdu(&cmdu, MacAddr::IEEE1905_MULTICAST).unwrap();
        assert_eq!(msg.metadata.msg_type, 0x0001);
        assert!(msg.metadata.relay);
        assert_eq!(msg.metadata.ether_type, ETHER_TYPE_1905);
        assert_eq!(msg.cmdu.as_ref(), cmdu.as_bytes());
    }

    #[test]
    fn unfinished_cmdu_is_not_copied() {
        let mut buf = [0u8; 32];
        let mut cmdu = Cmdu::create(&mut buf, 0x0001, 5).unwrap();
        assert!(matches!(
            CmduMessage::from_cmdu(&cmdu, MacAddr::IEEE1905_MULTICAST),
            Err(EnvelopeError::Malformed(_))
        ));

        cmdu.finalize().unwrap();
        cmdu.swap();
        assert!(matches!(
            CmduMessage::from_cmdu(&cmdu, MacAddr::IEEE1905_MULTICAST),
            Err(EnvelopeError::Malformed(_))
        ));

        cmdu.swap();
        assert!(CmduMessage::from_cmdu(&cmdu, MacAddr::IEEE1905_MULTICAST).is_ok());
    }

    #[test]
    fn fixed_records_reject_trailing_bytes() {
        let records = [
            TransportMessage::CmduTxConfirmation(TxConfirmationMetadata::default()),
            TransportMessage::InterfaceConfigurationRequest(InterfaceConfiguration::default()),
            TransportMessage::AlMacAddressConfiguration(AlMacConfiguration { al_mac: AGENT }),
            TransportMessage::Subscribe(SubscribeMetadata::subscribe([
                MessageSelector::external(0x0002),
            ])),
        ];
        for message in records {
            let envelope = message.to_envelope().unwrap();
            let mut long = BytesMut::from(envelope.payload().as_ref());
            long.put_u8(0);
            let long = Envelope::new(envelope.kind, long.freeze());
            assert!(
                matches!(
                    TransportMessage::from_envelope(&long),
                    Err(EnvelopeError::Malformed(_))
                ),
                "{:?} accepted a trailing byte",
                envelope.kind
            );
        }
    }
}
