//! Reply-frame parsing.
//!
//! The bootloader answers every command with a frame of four ASCII header
//! bytes followed by up to 252 payload bytes. This module turns one raw
//! frame into a typed [`Reply`].

use thiserror::Error;

use super::constants::{DATA_SIZE_DIGITS, MAX_REPLY_PAYLOAD, PRE_UPDATE_TRIGGER, REPLY_HEADER_SIZE};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply malformed ({0} bytes)")]
    Short(usize),

    #[error("unknown reply header {0:?}")]
    UnknownHeader(String),

    #[error("bad DATA length field {0:?}")]
    BadDataLength(String),
}

/// One parsed reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Terminal success; payload is an optional result string.
    Okay(String),
    /// Terminal failure; payload is the reason string.
    Fail(String),
    /// Non-terminal informational line.
    Info(String),
    /// The device is ready to receive this many bytes of bulk data.
    Data(u32),
}

impl Reply {
    /// Parse a single raw frame as read from the transport.
    ///
    /// Payload bytes past the fixed reply window are truncated as-is.
    pub fn parse(frame: &[u8]) -> Result<Reply, ReplyError> {
        if frame.len() < REPLY_HEADER_SIZE {
            return Err(ReplyError::Short(frame.len()));
        }
        let (header, rest) = frame.split_at(REPLY_HEADER_SIZE);
        let rest = &rest[..rest.len().min(MAX_REPLY_PAYLOAD)];
        match header {
            b"OKAY" => Ok(Reply::Okay(payload_text(rest))),
            b"FAIL" => Ok(Reply::Fail(payload_text(rest))),
            b"INFO" => Ok(Reply::Info(payload_text(rest))),
            b"DATA" => {
                let digits = payload_text(rest);
                let digits = digits.get(..DATA_SIZE_DIGITS).unwrap_or(&digits);
                u32::from_str_radix(digits, 16)
                    .map(Reply::Data)
                    .map_err(|_| ReplyError::BadDataLength(digits.to_string()))
            }
            other => Err(ReplyError::UnknownHeader(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// True when a FAIL reason announces the pre-update restart, meaning the
/// device will re-enumerate and the same sub-image must be flashed again.
pub fn is_restart_request(reason: &str) -> bool {
    reason.contains(PRE_UPDATE_TRIGGER)
}

fn payload_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}
