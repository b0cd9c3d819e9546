use std::time::{SystemTime, UNIX_EPOCH};

use meshframe_broker::BrokerClient;
use meshframe_envelope::{CmduMessage, CmduMetadata, TransportMessage, ETHER_TYPE_1905};
use meshframe_tlv::{Cmdu, TlvError};
use tracing::info;

use crate::cmd::decode::read_input;
use crate::cmd::SendArgs;
use crate::exit::{broker_error, parse_error, CliResult, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let wire = read_input(args.hex.as_deref(), args.file.as_deref())?;
    let message = cmdu_message(&args, wire).map_err(|err| parse_error("invalid CMDU", err))?;

    let mut client =
        BrokerClient::connect(&args.socket).map_err(|err| broker_error("connect failed", err))?;
    client
        .send(&message)
        .map_err(|err| broker_error("send failed", err))?;
    info!(kind = %message.kind(), selector = %message.selector(), "published");
    Ok(SUCCESS)
}

/// Wrap validated CMDU bytes in a transport message. Bytes past the CMDU's
/// own length are dropped.
fn cmdu_message(args: &SendArgs, mut wire: Vec<u8>) -> Result<TransportMessage, TlvError> {
    let (msg_type, relay, len) = {
        let mut scratch = wire.clone();
        let cmdu = Cmdu::parse(&mut scratch)?;
        (cmdu.message_type(), cmdu.relay_indicator(), cmdu.len())
    };
    wire.truncate(len);

    let metadata = CmduMetadata {
        cookie: args.cookie,
        dst: args.dst,
        src: args.src.unwrap_or_default(),
        ether_type: ETHER_TYPE_1905,
        msg_type,
        relay,
        preset_message_id: true,
        received_time: if args.received { unix_seconds() } else { 0 },
        ..CmduMetadata::default()
    };
    let message = CmduMessage {
        metadata,
        cmdu: wire.into(),
    };
    Ok(if args.received {
        TransportMessage::CmduRx(message)
    } else {
        TransportMessage::CmduTx(message)
    })
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
