use std::fmt;
use std::io;

use meshframe_broker::BrokerError;
use meshframe_envelope::EnvelopeError;
use meshframe_tlv::TlvError;
use meshframe_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn envelope_error(context: &str, err: EnvelopeError) -> CliError {
    match err {
        EnvelopeError::Io(source) => io_error(context, source),
        EnvelopeError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        EnvelopeError::CorruptEnvelope { .. }
        | EnvelopeError::UnknownKind(_)
        | EnvelopeError::PayloadTooLarge { .. }
        | EnvelopeError::Truncated { .. }
        | EnvelopeError::Malformed(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn broker_error(context: &str, err: BrokerError) -> CliError {
    match err {
        BrokerError::Transport(err) => transport_error(context, err),
        BrokerError::Envelope(err) => envelope_error(context, err),
        BrokerError::TooManyClients { .. } | BrokerError::SubscriptionLimit { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Errors from building a CMDU. Running out of buffer is a usage problem.
pub fn tlv_error(context: &str, err: TlvError) -> CliError {
    match err {
        TlvError::OutOfSpace { .. } | TlvError::LengthOverflow { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

/// Errors from parsing received bytes; a short buffer means truncated input.
pub fn parse_error(context: &str, err: TlvError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_exit_codes() {
        let denied = io_error("bind", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.code, PERMISSION_DENIED);
        let timeout = io_error("recv", io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(timeout.code, TIMEOUT);
        assert!(timeout.to_string().starts_with("recv: "));
    }

    #[test]
    fn codec_errors_are_data_invalid() {
        let err = tlv_error("decode", TlvError::TypeMismatch { expected: 1, found: 2 });
        assert_eq!(err.code, DATA_INVALID);
        let err = envelope_error("recv", EnvelopeError::CorruptEnvelope { found: 0 });
        assert_eq!(err.code, DATA_INVALID);
        let err = tlv_error(
            "encode",
            TlvError::OutOfSpace {
                requested: 8,
                remaining: 2,
            },
        );
        assert_eq!(err.code, USAGE);
        let err = parse_error(
            "decode",
            TlvError::OutOfSpace {
                requested: 10,
                remaining: 3,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn closed_connection_is_failure() {
        let err = broker_error(
            "receive failed",
            BrokerError::Envelope(EnvelopeError::ConnectionClosed),
        );
        assert_eq!(err.code, FAILURE);
    }
}
