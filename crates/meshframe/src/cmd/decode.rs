use std::fmt::Display;
use std::fs;
use std::path::Path;

use meshframe_tlv::{
    Cmdu, Element, InterfacePairInfo, MessageType, ReceiverInterfacePairInfo, Tlv, TlvError,
};

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, parse_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{parse_hex, print_cmdu, to_hex, CmduReport, FieldReport, OutputFormat, TlvReport};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let wire = read_input(args.hex.as_deref(), args.file.as_deref())?;
    let report = describe_cmdu(&wire).map_err(|err| parse_error("decode failed", err))?;
    print_cmdu(&report, &wire, format);
    Ok(SUCCESS)
}

/// CMDU bytes from hex text, a binary file, or hex on stdin.
pub fn read_input(hex: Option<&str>, file: Option<&Path>) -> CliResult<Vec<u8>> {
    if let Some(path) = file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    let text = match hex {
        Some(text) => text.to_string(),
        None => std::io::read_to_string(std::io::stdin())
            .map_err(|err| io_error("failed reading stdin", err))?,
    };
    parse_hex(&text).map_err(|err| CliError::new(USAGE, format!("invalid hex input: {err}")))
}

/// Parse a copy of `wire` and describe every TLV it carries.
pub fn describe_cmdu(wire: &[u8]) -> Result<CmduReport, TlvError> {
    let mut buf = wire.to_vec();
    let mut cmdu = Cmdu::parse(&mut buf)?;
    let mut tlvs = Vec::new();
    while let Some(tlv) = cmdu.next_tlv()? {
        tlvs.push(describe_tlv(&mut cmdu, tlv)?);
    }

    let message_type = cmdu.message_type();
    Ok(CmduReport {
        message_type,
        message_type_name: MessageType::from_u16(message_type).map_or("unknown", MessageType::name),
        message_id: cmdu.message_id(),
        relay: cmdu.relay_indicator(),
        last_fragment: cmdu.is_last_fragment(),
        length: cmdu.len(),
        tlvs,
    })
}

fn describe_tlv(cmdu: &mut Cmdu<'_>, tlv: Tlv) -> Result<TlvReport, TlvError> {
    let length = match (&tlv, tlv.header()) {
        (Tlv::Unknown(unknown), _) => unknown.length,
        (_, Some(header)) => cmdu.get(header.length),
        (_, None) => 0,
    };
    let mut fields = Vec::new();
    let mut children = Vec::new();

    match tlv {
        Tlv::AlMacAddress(t) => fields.push(field("mac", cmdu.get(t.mac))),
        Tlv::MacAddress(t) => fields.push(field("mac", cmdu.get(t.mac))),
        Tlv::Non1905NeighborDeviceList(t) => {
            fields.push(field("local_mac", cmdu.get(t.local_mac)));
            for mac in cmdu.entries(t.non_1905_macs) {
                fields.push(field("neighbor", mac));
            }
        }
        Tlv::Ieee1905NeighborDevice(t) => {
            fields.push(field("local_mac", cmdu.get(t.local_mac)));
            for neighbor in cmdu.entries(t.neighbors) {
                fields.push(field(
                    "neighbor",
                    format!("{} bridges={}", neighbor.al_mac, neighbor.has_bridges()),
                ));
            }
        }
        Tlv::LinkMetricQuery(t) => {
            fields.push(field("neighbor_type", cmdu.get(t.neighbor_type)));
            fields.push(field("neighbor_al_mac", cmdu.get(t.neighbor_al_mac)));
            fields.push(field("link_metrics", cmdu.get(t.link_metrics)));
        }
        Tlv::TransmitterLinkMetric(t) => {
            fields.push(field("reporter_al_mac", cmdu.get(t.reporter_al_mac)));
            fields.push(field("neighbor_al_mac", cmdu.get(t.neighbor_al_mac)));
            for pair in cmdu.entries(t.interface_pair_info) {
                fields.push(field("link", tx_link(&pair)));
            }
        }
        Tlv::ReceiverLinkMetric(t) => {
            fields.push(field("reporter_al_mac", cmdu.get(t.reporter_al_mac)));
            fields.push(field("neighbor_al_mac", cmdu.get(t.neighbor_al_mac)));
            for pair in cmdu.entries(t.interface_pair_info) {
                fields.push(field("link", rx_link(&pair)));
            }
        }
        Tlv::VendorSpecific(t) => {
            fields.push(field("oui", to_hex(&cmdu.get(t.oui))));
            let parent = t.element();
            while let Some(child) = cmdu.next_child_tlv(parent)? {
                children.push(describe_tlv(cmdu, child)?);
            }
        }
        Tlv::LinkMetricResultCode(t) => {
            fields.push(field("result_code", cmdu.get(t.result_code)));
        }
        Tlv::Unknown(unknown) => fields.push(field("value", to_hex(cmdu.raw_value(&unknown)))),
    }

    Ok(TlvReport {
        tag: tlv.tag(),
        name: tlv.kind().map_or("unknown", |kind| kind.name()),
        length,
        fields,
        children,
    })
}

fn field(name: &'static str, value: impl Display) -> FieldReport {
    FieldReport {
        name,
        value: value.to_string(),
    }
}

fn tx_link(pair: &InterfacePairInfo) -> String {
    let info = &pair.link_metric_info;
    format!(
        "{} -> {} errors={} tx={} throughput={} availability={} phy={}",
        pair.rc_interface_mac,
        pair.neighbor_interface_mac,
        info.packet_errors,
        info.transmitted_packets,
        info.mac_throughput_capacity,
        info.link_availability,
        info.phy_rate
    )
}

fn rx_link(pair: &ReceiverInterfacePairInfo) -> String {
    let info = &pair.link_metric_info;
    format!(
        "{} <- {} errors={} rx={} rssi={}",
        pair.rc_interface_mac,
        pair.neighbor_interface_mac,
        info.packet_errors,
        info.packets_received,
        info.rssi_db
    )
}
