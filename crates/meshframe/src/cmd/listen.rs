use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshframe_broker::BrokerClient;
use meshframe_envelope::{EnvelopeConfig, MessageKind, MessageSelector, TransportMessage};
use meshframe_tlv::MessageType;
use tracing::{debug, warn};

use crate::cmd::broker::install_ctrlc_handler;
use crate::cmd::decode::describe_cmdu;
use crate::cmd::ListenArgs;
use crate::exit::{broker_error, CliResult, SUCCESS};
use crate::output::{print_received, OutputFormat};

/// How long a receive blocks before the Ctrl-C flag is checked again.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = EnvelopeConfig {
        read_timeout: Some(POLL_INTERVAL),
        ..EnvelopeConfig::default()
    };
    let mut client = BrokerClient::connect_with_config(&args.socket, config)
        .map_err(|err| broker_error("connect failed", err))?;
    client
        .subscribe(&selectors(&args))
        .map_err(|err| broker_error("subscribe failed", err))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(shutdown.clone())?;

    let mut printed = 0usize;
    while !shutdown.load(Ordering::SeqCst) {
        let message = match client.recv() {
            Ok(message) => message,
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(broker_error("receive failed", err)),
        };

        let cmdu = match &message {
            TransportMessage::CmduRx(cmdu) | TransportMessage::CmduTx(cmdu) => cmdu,
            other => {
                debug!(kind = %other.kind(), "ignoring control message");
                continue;
            }
        };
        let report = match describe_cmdu(&cmdu.cmdu) {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, msg_type = cmdu.metadata.msg_type, "undecodable CMDU");
                continue;
            }
        };
        print_received(
            message.kind().name(),
            &cmdu.metadata,
            &report,
            &cmdu.cmdu,
            format,
        );
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

fn selectors(args: &ListenArgs) -> Vec<MessageSelector> {
    if args.outgoing {
        return vec![MessageSelector::internal(MessageKind::CmduTx)];
    }
    let types = args
        .message_types
        .clone()
        .unwrap_or_else(|| MessageType::ALL.iter().map(|kind| kind.as_u16()).collect());
    types
        .into_iter()
        .map(|message_type| {
            if message_type == MessageType::VendorSpecific.as_u16() {
                MessageSelector::vendor_specific(message_type)
            } else {
                MessageSelector::external(message_type)
            }
        })
        .collect()
}
