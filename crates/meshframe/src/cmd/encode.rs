use std::fs;

use meshframe_tlv::{
    Cmdu, InterfacePairInfo, LinkMetricInfo, MacAddr, TlvAlMacAddress, TlvError,
    TlvTransmitterLinkMetric,
};

use crate::cmd::EncodeArgs;
use crate::exit::{io_error, tlv_error, CliResult, SUCCESS};
use crate::output::{print_encoded, OutputFormat};

/// IEEE 802.3ab gigabit ethernet media type.
const MEDIA_TYPE_GIGABIT_ETHERNET: u16 = 0x0001;

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut buf = vec![0u8; args.buffer_size];
    let wire = build_cmdu(&mut buf, &args).map_err(|err| tlv_error("encode failed", err))?;

    if let Some(path) = &args.output {
        fs::write(path, wire)
            .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    }
    print_encoded(args.message_type, args.message_id, wire, format);
    Ok(SUCCESS)
}

/// Build the CMDU described by `args` in `buf` and return its wire bytes.
fn build_cmdu<'a>(buf: &'a mut [u8], args: &EncodeArgs) -> Result<&'a [u8], TlvError> {
    let len = {
        let mut cmdu = Cmdu::create(buf, args.message_type, args.message_id)?;
        cmdu.set_relay_indicator(args.relay)?;

        let al_mac = cmdu.add::<TlvAlMacAddress>()?;
        cmdu.set(al_mac.mac, args.al_mac)?;

        if let Some(neighbor) = args.neighbor {
            add_link_metric(&mut cmdu, args.al_mac, neighbor, &args.links, args.phy_rate)?;
        }

        cmdu.finalize()?;
        cmdu.len()
    };
    Ok(&buf[..len])
}

fn add_link_metric(
    cmdu: &mut Cmdu<'_>,
    reporter: MacAddr,
    neighbor: MacAddr,
    links: &[(MacAddr, MacAddr)],
    phy_rate: u16,
) -> Result<(), TlvError> {
    let tlv = cmdu.add::<TlvTransmitterLinkMetric>()?;
    cmdu.set(tlv.reporter_al_mac, reporter)?;
    cmdu.set(tlv.neighbor_al_mac, neighbor)?;

    cmdu.alloc(tlv.interface_pair_info, links.len())?;
    for (index, (local, remote)) in links.iter().enumerate() {
        let pair = InterfacePairInfo {
            rc_interface_mac: *local,
            neighbor_interface_mac: *remote,
            link_metric_info: LinkMetricInfo {
                intf_type: MEDIA_TYPE_GIGABIT_ETHERNET,
                link_availability: 100,
                mac_throughput_capacity: phy_rate,
                phy_rate,
                ..LinkMetricInfo::default()
            },
        };
        cmdu.set_entry(tlv.interface_pair_info, index, pair)?;
    }
    Ok(())
}
