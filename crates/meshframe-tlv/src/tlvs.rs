//! IEEE 1905.1 TLV definitions.

use std::fmt;

use crate::cmdu::{Cmdu, UnknownTlv};
use crate::element::{Element, ElementRef, TlvElement, TlvHeader};
use crate::error::Result;
use crate::field::{Field, FieldCursor, List};
use crate::mac::MacAddr;

/// TLV type tags understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    AlMacAddress = 0x01,
    MacAddress = 0x02,
    Non1905NeighborDeviceList = 0x06,
    Ieee1905NeighborDevice = 0x07,
    LinkMetricQuery = 0x08,
    TransmitterLinkMetric = 0x09,
    ReceiverLinkMetric = 0x0A,
    VendorSpecific = 0x0B,
    LinkMetricResultCode = 0x0C,
}

impl TlvType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::AlMacAddress),
            0x02 => Some(Self::MacAddress),
            0x06 => Some(Self::Non1905NeighborDeviceList),
            0x07 => Some(Self::Ieee1905NeighborDevice),
            0x08 => Some(Self::LinkMetricQuery),
            0x09 => Some(Self::TransmitterLinkMetric),
            0x0A => Some(Self::ReceiverLinkMetric),
            0x0B => Some(Self::VendorSpecific),
            0x0C => Some(Self::LinkMetricResultCode),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AlMacAddress => "al_mac_address",
            Self::MacAddress => "mac_address",
            Self::Non1905NeighborDeviceList => "non_1905_neighbor_device_list",
            Self::Ieee1905NeighborDevice => "1905_neighbor_device",
            Self::LinkMetricQuery => "link_metric_query",
            Self::TransmitterLinkMetric => "transmitter_link_metric",
            Self::ReceiverLinkMetric => "receiver_link_metric",
            Self::VendorSpecific => "vendor_specific",
            Self::LinkMetricResultCode => "link_metric_result_code",
        }
    }
}

impl fmt::Display for TlvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

crate::wire_struct! {
    /// Entry of a 1905.1 neighbor device TLV.
    pub struct NeighborDevice {
        pub al_mac: MacAddr,
        pub flags: u8,
    }
}

impl NeighborDevice {
    /// An IEEE 802.1 bridge sits between the two devices.
    pub const BRIDGES_FLAG: u8 = 0x80;

    pub fn has_bridges(&self) -> bool {
        self.flags & Self::BRIDGES_FLAG != 0
    }
}

crate::wire_struct! {
    pub struct LinkMetricInfo {
        /// Media type of the local interface.
        pub intf_type: u16,
        pub ieee802_1_bridge_flag: u8,
        pub packet_errors: u32,
        pub transmitted_packets: u32,
        /// Mbps.
        pub mac_throughput_capacity: u16,
        /// Percent of time the link is available.
        pub link_availability: u16,
        /// Mbps.
        pub phy_rate: u16,
    }
}

crate::wire_struct! {
    pub struct InterfacePairInfo {
        pub rc_interface_mac: MacAddr,
        pub neighbor_interface_mac: MacAddr,
        pub link_metric_info: LinkMetricInfo,
    }
}

crate::wire_struct! {
    pub struct ReceiverLinkMetricInfo {
        pub intf_type: u16,
        pub packet_errors: u32,
        pub packets_received: u32,
        pub rssi_db: u8,
    }
}

crate::wire_struct! {
    pub struct ReceiverInterfacePairInfo {
        pub rc_interface_mac: MacAddr,
        pub neighbor_interface_mac: MacAddr,
        pub link_metric_info: ReceiverLinkMetricInfo,
    }
}

/// Implements `Element` and `TlvElement` for a TLV struct whose first
/// field is its `TlvHeader`.
macro_rules! tlv_element {
    ($name:ident, $kind:ident, |$cursor:ident| $body:block) => {
        impl Element for $name {
            fn layout($cursor: &mut FieldCursor<'_>) -> Result<Self> $body

            fn element(&self) -> ElementRef {
                self.header.element
            }
        }

        impl TlvElement for $name {
            const TYPE: TlvType = TlvType::$kind;

            fn header(&self) -> TlvHeader {
                self.header
            }
        }
    };
}

/// 1905 AL MAC address of the transmitting device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvAlMacAddress {
    header: TlvHeader,
    pub mac: Field<MacAddr>,
}

tlv_element!(TlvAlMacAddress, AlMacAddress, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::AlMacAddress.as_u8())?,
        mac: cursor.required()?,
    })
});

/// MAC address of the interface the message is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvMacAddress {
    header: TlvHeader,
    pub mac: Field<MacAddr>,
}

tlv_element!(TlvMacAddress, MacAddress, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::MacAddress.as_u8())?,
        mac: cursor.required()?,
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvNon1905NeighborDeviceList {
    header: TlvHeader,
    pub local_mac: Field<MacAddr>,
    pub non_1905_macs: List<MacAddr>,
}

tlv_element!(TlvNon1905NeighborDeviceList, Non1905NeighborDeviceList, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::Non1905NeighborDeviceList.as_u8())?,
        local_mac: cursor.field()?,
        non_1905_macs: cursor.list()?,
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv1905NeighborDevice {
    header: TlvHeader,
    pub local_mac: Field<MacAddr>,
    pub neighbors: List<NeighborDevice>,
}

tlv_element!(Tlv1905NeighborDevice, Ieee1905NeighborDevice, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::Ieee1905NeighborDevice.as_u8())?,
        local_mac: cursor.field()?,
        neighbors: cursor.list()?,
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvLinkMetricQuery {
    header: TlvHeader,
    pub neighbor_type: Field<u8>,
    pub neighbor_al_mac: Field<MacAddr>,
    pub link_metrics: Field<u8>,
}

impl TlvLinkMetricQuery {
    pub const ALL_NEIGHBORS: u8 = 0x00;
    pub const SPECIFIC_NEIGHBOR: u8 = 0x01;

    pub const TX_LINK_METRICS_ONLY: u8 = 0x00;
    pub const RX_LINK_METRICS_ONLY: u8 = 0x01;
    pub const BOTH_TX_AND_RX: u8 = 0x02;
}

tlv_element!(TlvLinkMetricQuery, LinkMetricQuery, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::LinkMetricQuery.as_u8())?,
        neighbor_type: cursor.field()?,
        neighbor_al_mac: cursor.field()?,
        link_metrics: cursor.field()?,
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvTransmitterLinkMetric {
    header: TlvHeader,
    pub reporter_al_mac: Field<MacAddr>,
    pub neighbor_al_mac: Field<MacAddr>,
    pub interface_pair_info: List<InterfacePairInfo>,
}

tlv_element!(TlvTransmitterLinkMetric, TransmitterLinkMetric, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::TransmitterLinkMetric.as_u8())?,
        reporter_al_mac: cursor.required()?,
        neighbor_al_mac: cursor.required()?,
        interface_pair_info: cursor.list()?,
    })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvReceiverLinkMetric {
    header: TlvHeader,
    pub reporter_al_mac: Field<MacAddr>,
    pub neighbor_al_mac: Field<MacAddr>,
    pub interface_pair_info: List<ReceiverInterfacePairInfo>,
}

tlv_element!(TlvReceiverLinkMetric, ReceiverLinkMetric, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::ReceiverLinkMetric.as_u8())?,
        reporter_al_mac: cursor.required()?,
        neighbor_al_mac: cursor.required()?,
        interface_pair_info: cursor.list()?,
    })
});

/// Vendor specific TLV: an OUI followed by vendor-defined TLVs.
///
/// Children are added with [`Cmdu::add_child`] and read back with
/// [`Cmdu::next_child_tlv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvVendorSpecific {
    header: TlvHeader,
    pub oui: Field<[u8; 3]>,
}

tlv_element!(TlvVendorSpecific, VendorSpecific, |cursor| {
    let header = cursor.tlv_header(TlvType::VendorSpecific.as_u8())?;
    let oui = cursor.required()?;
    cursor.nested()?;
    Ok(Self { header, oui })
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvLinkMetricResultCode {
    header: TlvHeader,
    pub result_code: Field<u8>,
}

impl TlvLinkMetricResultCode {
    pub const INVALID_NEIGHBOR: u8 = 0x00;
}

tlv_element!(TlvLinkMetricResultCode, LinkMetricResultCode, |cursor| {
    Ok(Self {
        header: cursor.tlv_header(TlvType::LinkMetricResultCode.as_u8())?,
        result_code: cursor.required()?,
    })
});

/// A parsed TLV of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tlv {
    AlMacAddress(TlvAlMacAddress),
    MacAddress(TlvMacAddress),
    Non1905NeighborDeviceList(TlvNon1905NeighborDeviceList),
    Ieee1905NeighborDevice(Tlv1905NeighborDevice),
    LinkMetricQuery(TlvLinkMetricQuery),
    TransmitterLinkMetric(TlvTransmitterLinkMetric),
    ReceiverLinkMetric(TlvReceiverLinkMetric),
    VendorSpecific(TlvVendorSpecific),
    LinkMetricResultCode(TlvLinkMetricResultCode),
    /// Tag not known to this crate; its bytes were skipped.
    Unknown(UnknownTlv),
}

impl Tlv {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Unknown(unknown) => unknown.tag,
            _ => self.kind().map_or(0, TlvType::as_u8),
        }
    }

    /// Known kind, `None` for [`Tlv::Unknown`].
    pub fn kind(&self) -> Option<TlvType> {
        Some(match self {
            Self::AlMacAddress(_) => TlvType::AlMacAddress,
            Self::MacAddress(_) => TlvType::MacAddress,
            Self::Non1905NeighborDeviceList(_) => TlvType::Non1905NeighborDeviceList,
            Self::Ieee1905NeighborDevice(_) => TlvType::Ieee1905NeighborDevice,
            Self::LinkMetricQuery(_) => TlvType::LinkMetricQuery,
            Self::TransmitterLinkMetric(_) => TlvType::TransmitterLinkMetric,
            Self::ReceiverLinkMetric(_) => TlvType::ReceiverLinkMetric,
            Self::VendorSpecific(_) => TlvType::VendorSpecific,
            Self::LinkMetricResultCode(_) => TlvType::LinkMetricResultCode,
            Self::Unknown(_) => return None,
        })
    }

    /// Element handle, `None` for skipped TLVs.
    pub fn element(&self) -> Option<ElementRef> {
        match self {
            Self::AlMacAddress(t) => Some(t.element()),
            Self::MacAddress(t) => Some(t.element()),
            Self::Non1905NeighborDeviceList(t) => Some(t.element()),
            Self::Ieee1905NeighborDevice(t) => Some(t.element()),
            Self::LinkMetricQuery(t) => Some(t.element()),
            Self::TransmitterLinkMetric(t) => Some(t.element()),
            Self::ReceiverLinkMetric(t) => Some(t.element()),
            Self::VendorSpecific(t) => Some(t.element()),
            Self::LinkMetricResultCode(t) => Some(t.element()),
            Self::Unknown(_) => None,
        }
    }

    pub fn header(&self) -> Option<TlvHeader> {
        match self {
            Self::AlMacAddress(t) => Some(t.header()),
            Self::MacAddress(t) => Some(t.header()),
            Self::Non1905NeighborDeviceList(t) => Some(t.header()),
            Self::Ieee1905NeighborDevice(t) => Some(t.header()),
            Self::LinkMetricQuery(t) => Some(t.header()),
            Self::TransmitterLinkMetric(t) => Some(t.header()),
            Self::ReceiverLinkMetric(t) => Some(t.header()),
            Self::VendorSpecific(t) => Some(t.header()),
            Self::LinkMetricResultCode(t) => Some(t.header()),
            Self::Unknown(_) => None,
        }
    }
}

impl Cmdu<'_> {
    /// Read the next top-level TLV, dispatching on its tag.
    ///
    /// Returns `Ok(None)` once the message is exhausted. Unknown tags are
    /// skipped and surfaced as [`Tlv::Unknown`].
    pub fn next_tlv(&mut self) -> Result<Option<Tlv>> {
        self.read_tlv(None)
    }

    /// Read the next TLV nested in `parent`.
    pub fn next_child_tlv(&mut self, parent: ElementRef) -> Result<Option<Tlv>> {
        self.read_tlv(Some(parent))
    }

    fn read_tlv(&mut self, parent: Option<ElementRef>) -> Result<Option<Tlv>> {
        if self.is_aborted() {
            return Err(crate::TlvError::Aborted);
        }
        let tag = match parent {
            None => self.peek_tag(),
            Some(parent) => self.peek_child_tag(parent),
        };
        let Some(tag) = tag else {
            return Ok(None);
        };
        let tlv = match TlvType::from_u8(tag) {
            Some(TlvType::AlMacAddress) => Tlv::AlMacAddress(self.next_in(parent)?),
            Some(TlvType::MacAddress) => Tlv::MacAddress(self.next_in(parent)?),
            Some(TlvType::Non1905NeighborDeviceList) => {
                Tlv::Non1905NeighborDeviceList(self.next_in(parent)?)
            }
            Some(TlvType::Ieee1905NeighborDevice) => {
                Tlv::Ieee1905NeighborDevice(self.next_in(parent)?)
            }
            Some(TlvType::LinkMetricQuery) => Tlv::LinkMetricQuery(self.next_in(parent)?),
            Some(TlvType::TransmitterLinkMetric) => {
                Tlv::TransmitterLinkMetric(self.next_in(parent)?)
            }
            Some(TlvType::ReceiverLinkMetric) => Tlv::ReceiverLinkMetric(self.next_in(parent)?),
            Some(TlvType::VendorSpecific) => Tlv::VendorSpecific(self.next_in(parent)?),
            Some(TlvType::LinkMetricResultCode) => {
                Tlv::LinkMetricResultCode(self.next_in(parent)?)
            }
            None => Tlv::Unknown(self.skip_unknown(parent)?),
        };
        Ok(Some(tlv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdu::{CMDU_HEADER_LENGTH, TLV_HEADER_LENGTH};
    use crate::TlvError;

    const AL_MAC: MacAddr = MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);

    #[test]
    fn tlv_type_registry() {
        for tag in 0..=u8::MAX {
            if let Some(kind) = TlvType::from_u8(tag) {
                assert_eq!(kind.as_u8(), tag);
            }
        }
        assert_eq!(TlvType::from_u8(0x03), None);
        assert_eq!(TlvType::VendorSpecific.to_string(), "vendor_specific");
    }

    #[test]
    fn partial_list_entry_is_ignored() {
        let mut buf = [0u8; 128];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0003, 7).unwrap();
            let list = cmdu.add::<TlvNon1905NeighborDeviceList>().unwrap();
            cmdu.set(list.local_mac, AL_MAC).unwrap();
            cmdu.alloc(list.non_1905_macs, 1).unwrap();
            cmdu.set_entry(list.non_1905_macs, 0, MacAddr::BROADCAST).unwrap();
            let al_mac = cmdu.add::<TlvAlMacAddress>().unwrap();
            cmdu.set(al_mac.mac, AL_MAC).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        // Splice two stray bytes onto the end of the neighbor list TLV.
        let list_end = CMDU_HEADER_LENGTH + TLV_HEADER_LENGTH + 12;
        let mut wire = buf[..len].to_vec();
        wire.splice(list_end..list_end, [0xAB, 0xCD]);
        let tlv_len = u16::from_be_bytes([wire[11], wire[12]]) + 2;
        wire[11..13].copy_from_slice(&tlv_len.to_be_bytes());
        let total = wire.len() as u16;
        wire[8..10].copy_from_slice(&total.to_be_bytes());

        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let Some(Tlv::Non1905NeighborDeviceList(list)) = cmdu.next_tlv().unwrap() else {
            panic!("expected the neighbor list");
        };
        assert_eq!(cmdu.count(list.non_1905_macs), 1);
        assert_eq!(cmdu.entry(list.non_1905_macs, 0), Some(MacAddr::BROADCAST));
        let Some(Tlv::AlMacAddress(al_mac)) = cmdu.next_tlv().unwrap() else {
            panic!("expected the AL MAC TLV");
        };
        assert_eq!(cmdu.get(al_mac.mac), AL_MAC);
    }

    #[test]
    fn next_tlv_dispatches_and_skips_unknown() {
        let mut buf = [0u8; 128];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0005, 42).unwrap();
            let query = cmdu.add::<TlvLinkMetricQuery>().unwrap();
            cmdu.set(query.neighbor_type, TlvLinkMetricQuery::SPECIFIC_NEIGHBOR)
                .unwrap();
            cmdu.set(query.neighbor_al_mac, AL_MAC).unwrap();
            cmdu.set(query.link_metrics, TlvLinkMetricQuery::BOTH_TX_AND_RX)
                .unwrap();
            let code = cmdu.add::<TlvLinkMetricResultCode>().unwrap();
            cmdu.set(code.result_code, TlvLinkMetricResultCode::INVALID_NEIGHBOR)
                .unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        // Splice an unknown TLV (tag 0x7E, 2 value bytes) between the two.
        let mut wire = buf[..len].to_vec();
        let insert_at = 10 + 3 + 8;
        wire.splice(insert_at..insert_at, [0x7E, 0x00, 0x02, 0xCA, 0xFE]);
        let total = wire.len() as u16;
        wire[8..10].copy_from_slice(&total.to_be_bytes());

        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let Some(Tlv::LinkMetricQuery(query)) = cmdu.next_tlv().unwrap() else {
            panic!("expected a link metric query");
        };
        assert_eq!(cmdu.get(query.neighbor_al_mac), AL_MAC);
        assert_eq!(
            cmdu.get(query.link_metrics),
            TlvLinkMetricQuery::BOTH_TX_AND_RX
        );

        let Some(Tlv::Unknown(unknown)) = cmdu.next_tlv().unwrap() else {
            panic!("expected an unknown TLV");
        };
        assert_eq!(unknown.tag, 0x7E);
        assert_eq!(cmdu.raw_value(&unknown), &[0xCA, 0xFE]);

        let next = cmdu.next_tlv().unwrap().unwrap();
        assert_eq!(next.kind(), Some(TlvType::LinkMetricResultCode));
        assert_eq!(cmdu.next_tlv().unwrap(), None);
    }

    #[test]
    fn neighbor_device_list_round_trip() {
        let mut buf = [0u8; 64];
        let neighbor = NeighborDevice {
            al_mac: AL_MAC,
            flags: NeighborDevice::BRIDGES_FLAG,
        };
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0003, 1).unwrap();
            let tlv = cmdu.add::<Tlv1905NeighborDevice>().unwrap();
            cmdu.set(tlv.local_mac, AL_MAC).unwrap();
            cmdu.alloc(tlv.neighbors, 1).unwrap();
            cmdu.set_entry(tlv.neighbors, 0, neighbor).unwrap();
            assert_eq!(
                cmdu.set_entry(tlv.neighbors, 1, neighbor),
                Err(TlvError::EntryNotFound { index: 1, count: 1 })
            );
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let Some(Tlv::Ieee1905NeighborDevice(tlv)) = cmdu.next_tlv().unwrap() else {
            panic!("expected a neighbor device TLV");
        };
        let entry = cmdu.entry(tlv.neighbors, 0).unwrap();
        assert!(entry.has_bridges());
        assert_eq!(entry.al_mac, AL_MAC);
    }

    #[test]
    fn receiver_link_metric_entries_swap_per_field() {
        let info = ReceiverInterfacePairInfo {
            rc_interface_mac: AL_MAC,
            neighbor_interface_mac: MacAddr::BROADCAST,
            link_metric_info: ReceiverLinkMetricInfo {
                intf_type: 0x0104,
                packet_errors: 1,
                packets_received: 0x00AB_CDEF,
                rssi_db: 200,
            },
        };
        let mut buf = [0u8; 64];
        let mut cmdu = Cmdu::create(&mut buf, 0x0006, 1).unwrap();
        let tlv = cmdu.add::<TlvReceiverLinkMetric>().unwrap();
        cmdu.set(tlv.reporter_al_mac, AL_MAC).unwrap();
        cmdu.set(tlv.neighbor_al_mac, AL_MAC).unwrap();
        cmdu.alloc(tlv.interface_pair_info, 1).unwrap();
        cmdu.set_entry(tlv.interface_pair_info, 0, info).unwrap();
        cmdu.finalize().unwrap();

        let entry_at = 10 + 3 + 12;
        let bytes = cmdu.as_bytes();
        assert_eq!(&bytes[entry_at + 12..entry_at + 14], &[0x01, 0x04]);
        assert_eq!(&bytes[entry_at + 18..entry_at + 22], &[0x00, 0xAB, 0xCD, 0xEF]);
        assert_eq!(cmdu.entry(tlv.interface_pair_info, 0), Some(info));
    }

    #[test]
    fn nested_vendor_children_dispatch() {
        let mut buf = [0u8; 64];
        let len = {
            let mut cmdu = Cmdu::create(&mut buf, 0x0004, 1).unwrap();
            let vendor = cmdu.add::<TlvVendorSpecific>().unwrap();
            cmdu.set(vendor.oui, [0x00, 0x10, 0x18]).unwrap();
            let inner = cmdu.add_child::<TlvMacAddress>(vendor.element()).unwrap();
            cmdu.set(inner.mac, AL_MAC).unwrap();
            cmdu.finalize().unwrap();
            cmdu.len()
        };

        let mut wire = buf[..len].to_vec();
        let mut cmdu = Cmdu::parse(&mut wire).unwrap();
        let Some(Tlv::VendorSpecific(vendor)) = cmdu.next_tlv().unwrap() else {
            panic!("expected a vendor specific TLV");
        };
        let child = cmdu.next_child_tlv(vendor.element()).unwrap().unwrap();
        assert_eq!(child.tag(), 0x02);
        assert_eq!(cmdu.next_child_tlv(vendor.element()).unwrap(), None);
        assert_eq!(cmdu.next_tlv().unwrap(), None);
    }
}
