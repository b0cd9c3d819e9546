use std::fmt::Write as _;
use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use meshframe_broker::BrokerStats;
use meshframe_envelope::CmduMetadata;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CmduReport {
    pub message_type: u16,
    pub message_type_name: &'static str,
    pub message_id: u16,
    pub relay: bool,
    pub last_fragment: bool,
    pub length: usize,
    pub tlvs: Vec<TlvReport>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TlvReport {
    pub tag: u8,
    pub name: &'static str,
    pub length: u16,
    pub fields: Vec<FieldReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TlvReport>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldReport {
    pub name: &'static str,
    pub value: String,
}

#[derive(Serialize)]
struct ReceivedOutput<'a> {
    kind: &'a str,
    src: String,
    dst: String,
    if_index: u32,
    received_time: u64,
    cmdu: &'a CmduReport,
}

#[derive(Serialize)]
struct EncodedOutput<'a> {
    message_type: u16,
    message_id: u16,
    length: usize,
    hex: &'a str,
}

pub fn print_cmdu(report: &CmduReport, wire: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            println!("{}", header_table(report));
            if !report.tlvs.is_empty() {
                println!("{}", tlv_table(&report.tlvs));
            }
        }
        OutputFormat::Pretty => print!("{}", pretty_cmdu(report)),
        OutputFormat::Raw => print_raw(wire),
    }
}

/// Print a CMDU delivered through the broker together with its metadata.
pub fn print_received(
    kind: &str,
    metadata: &CmduMetadata,
    report: &CmduReport,
    wire: &[u8],
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&ReceivedOutput {
            kind,
            src: metadata.src.to_string(),
            dst: metadata.dst.to_string(),
            if_index: metadata.if_index,
            received_time: metadata.received_time,
            cmdu: report,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SRC", "DST", "IF", "TYPE", "ID", "TLVS"])
                .add_row(vec![
                    kind.to_string(),
                    metadata.src.to_string(),
                    metadata.dst.to_string(),
                    metadata.if_index.to_string(),
                    report.message_type_name.to_string(),
                    report.message_id.to_string(),
                    report.tlvs.len().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{kind} src={} dst={} if={}",
                metadata.src, metadata.dst, metadata.if_index
            );
            print!("{}", pretty_cmdu(report));
        }
        OutputFormat::Raw => print_raw(wire),
    }
}

pub fn print_encoded(message_type: u16, message_id: u16, wire: &[u8], format: OutputFormat) {
    let hex = to_hex(wire);
    match format {
        OutputFormat::Json => print_json(&EncodedOutput {
            message_type,
            message_id,
            length: wire.len(),
            hex: &hex,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "ID", "LENGTH", "HEX"])
                .add_row(vec![
                    format!("{message_type:#06x}"),
                    message_id.to_string(),
                    wire.len().to_string(),
                    hex,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{hex}"),
        OutputFormat::Raw => print_raw(wire),
    }
}

pub fn print_stats(stats: &BrokerStats, format: OutputFormat) {
    let rows = [
        ("clients_accepted", stats.clients_accepted),
        ("clients_rejected", stats.clients_rejected),
        ("envelopes_received", stats.envelopes_received),
        ("envelopes_delivered", stats.envelopes_delivered),
        ("envelopes_dropped", stats.envelopes_dropped),
    ];
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::from(*value)))
                .collect();
            print_json(&map);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in rows {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (name, value) in rows {
                println!("{name}={value}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn header_table(report: &CmduReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["TYPE", "NAME", "ID", "RELAY", "LAST FRAGMENT", "LENGTH"])
        .add_row(vec![
            format!("{:#06x}", report.message_type),
            report.message_type_name.to_string(),
            report.message_id.to_string(),
            report.relay.to_string(),
            report.last_fragment.to_string(),
            report.length.to_string(),
        ]);
    table
}

fn tlv_table(tlvs: &[TlvReport]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["TAG", "NAME", "LENGTH", "FIELDS"]);
    add_tlv_rows(&mut table, tlvs, "");
    table
}

fn add_tlv_rows(table: &mut Table, tlvs: &[TlvReport], indent: &str) {
    for tlv in tlvs {
        let fields = tlv
            .fields
            .iter()
            .map(|field| format!("{}={}", field.name, field.value))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            format!("{indent}{:#04x}", tlv.tag),
            format!("{indent}{}", tlv.name),
            tlv.length.to_string(),
            fields,
        ]);
        add_tlv_rows(table, &tlv.children, &format!("{indent}  "));
    }
}

fn pretty_cmdu(report: &CmduReport) -> String {
    let mut out = format!(
        "cmdu type={:#06x} ({}) id={} relay={} last_fragment={} length={}\n",
        report.message_type,
        report.message_type_name,
        report.message_id,
        report.relay,
        report.last_fragment,
        report.length
    );
    pretty_tlvs(&mut out, &report.tlvs, 1);
    out
}

fn pretty_tlvs(out: &mut String, tlvs: &[TlvReport], depth: usize) {
    for tlv in tlvs {
        let _ = write!(
            out,
            "{:indent$}tlv {:#04x} {} length={}",
            "",
            tlv.tag,
            tlv.name,
            tlv.length,
            indent = depth * 2
        );
        for field in &tlv.fields {
            let _ = write!(out, " {}={}", field.name, field.value);
        }
        out.push('\n');
        pretty_tlvs(out, &tlv.children, depth + 1);
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Parse hex text; whitespace, `:` separators and a leading `0x` are ignored.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err("hex input has an odd number of digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let high = hex_value(pair[0])?;
            let low = hex_value(pair[1])?;
            Ok((high << 4) | low)
        })
        .collect()
}

fn hex_value(digit: u8) -> Result<u8, String> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(format!("invalid hex digit {:?}", other as char)),
    }
}
