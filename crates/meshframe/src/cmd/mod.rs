use clap::{Args, Subcommand};
use std::path::PathBuf;

use meshframe_tlv::{MacAddr, MessageType};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod broker;
pub mod decode;
pub mod encode;
pub mod listen;
pub mod send;
pub mod version;

/// Broker socket used when neither `--socket` nor `MESHFRAME_SOCKET` is set.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/meshframe.sock";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a CMDU and print its header and TLVs.
    Decode(DecodeArgs),
    /// Build a CMDU and print its wire bytes.
    Encode(EncodeArgs),
    /// Run the local message broker.
    Broker(BrokerArgs),
    /// Publish a CMDU through the broker.
    Send(SendArgs),
    /// Subscribe through the broker and print delivered CMDUs.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Broker(args) => broker::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// CMDU bytes as hex. Read from stdin when neither this nor --file is given.
    #[arg(conflicts_with = "file")]
    pub hex: Option<String>,
    /// Read raw CMDU bytes from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Message type: a name such as `topology_notification` or a number.
    #[arg(long, short = 't', default_value = "topology_notification", value_parser = parse_message_type)]
    pub message_type: u16,
    /// Message id.
    #[arg(long, default_value = "0")]
    pub message_id: u16,
    /// AL MAC address carried in the AL MAC address TLV.
    #[arg(long)]
    pub al_mac: MacAddr,
    /// Add a transmitter link metric TLV towards this neighbor AL MAC.
    #[arg(long)]
    pub neighbor: Option<MacAddr>,
    /// Interface pair of the link metric TLV as LOCAL_MAC,NEIGHBOR_MAC (repeatable).
    #[arg(long = "link", value_name = "LOCAL,NEIGHBOR", requires = "neighbor", value_parser = parse_link)]
    pub links: Vec<(MacAddr, MacAddr)>,
    /// PHY rate in Mbps reported for every interface pair.
    #[arg(long, default_value = "1000")]
    pub phy_rate: u16,
    /// Set the relay indicator.
    #[arg(long)]
    pub relay: bool,
    /// Size of the build buffer in bytes.
    #[arg(long, default_value = "1500")]
    pub buffer_size: usize,
    /// Also write the wire bytes to this file.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Socket path to bind.
    #[arg(long, env = "MESHFRAME_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
    /// Maximum number of connected clients.
    #[arg(long)]
    pub max_clients: Option<usize>,
    /// Maximum number of selectors per client.
    #[arg(long)]
    pub max_subscriptions: Option<usize>,
    /// Socket file permissions (octal).
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Broker socket path.
    #[arg(long, env = "MESHFRAME_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
    /// CMDU bytes as hex.
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read raw CMDU bytes from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Destination MAC address.
    #[arg(long, default_value_t = MacAddr::IEEE1905_MULTICAST)]
    pub dst: MacAddr,
    /// Source MAC address recorded in the metadata.
    #[arg(long)]
    pub src: Option<MacAddr>,
    /// Value echoed back in the transmit confirmation.
    #[arg(long, default_value = "0")]
    pub cookie: u16,
    /// Publish as a received CMDU instead of one to transmit.
    #[arg(long)]
    pub received: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Broker socket path.
    #[arg(long, env = "MESHFRAME_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
    /// Message types to subscribe to (comma-separated). Default: all known types.
    #[arg(long, short = 't', value_delimiter = ',', value_parser = parse_message_type)]
    pub message_types: Option<Vec<u16>>,
    /// Subscribe to CMDUs queued for transmission instead of received ones.
    #[arg(long)]
    pub outgoing: bool,
    /// Exit after receiving N CMDUs.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Accepts a message type name or a decimal / `0x` hex number.
pub fn parse_message_type(input: &str) -> Result<u16, String> {
    if let Some(kind) = MessageType::ALL.iter().find(|kind| kind.name() == input) {
        return Ok(kind.as_u16());
    }
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("unknown message type: {input}"))
}

fn parse_link(input: &str) -> Result<(MacAddr, MacAddr), String> {
    let (local, neighbor) = input
        .split_once(',')
        .ok_or_else(|| format!("expected LOCAL_MAC,NEIGHBOR_MAC: {input}"))?;
    let local = local.trim().parse().map_err(|err| format!("{err}"))?;
    let neighbor = neighbor.trim().parse().map_err(|err| format!("{err}"))?;
    Ok((local, neighbor))
}

fn parse_mode(input: &str) -> Result<u32, String> {
    let digits = input.strip_prefix("0o").unwrap_or(input);
    u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode: {input}"))
}
