//! Typed wire messages between coordinator and partitions
//!
//! Messages travel inside the engine's [`Message`](spindle_engine::Message)
//! envelope: control fields ride in headers, the opaque transaction payload
//! (or result) is the body. Three message kinds exist:
//! - [`Fragment`]: coordinator → partition, one per participant per round
//! - [`CommitDecision`]: coordinator → partition, one per participant at finish
//! - [`FragmentResponse`]: partition → coordinator

use thiserror::Error;

mod messages;
mod responses;

pub use messages::{CommitDecision, Fragment};
pub use responses::FragmentResponse;

/// Header naming the message kind.
pub const MSG_TYPE: &str = "msg_type";

/// Errors that can occur when decoding an envelope
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid value for header {header}: {value}")]
    InvalidHeader { header: &'static str, value: String },

    #[error("Unexpected message type: {0}")]
    UnexpectedType(String),
}

pub(crate) fn require<'a>(
    msg: &'a spindle_engine::Message,
    header: &'static str,
) -> Result<&'a str, ParseError> {
    msg.get_header(header).ok_or(ParseError::MissingHeader(header))
}

pub(crate) fn parse_i32(
    msg: &spindle_engine::Message,
    header: &'static str,
) -> Result<i32, ParseError> {
    let value = require(msg, header)?;
    value.parse().map_err(|_| ParseError::InvalidHeader {
        header,
        value: value.to_string(),
    })
}

pub(crate) fn parse_bool(
    msg: &spindle_engine::Message,
    header: &'static str,
) -> Result<bool, ParseError> {
    match require(msg, header)? {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ParseError::InvalidHeader {
            header,
            value: other.to_string(),
        }),
    }
}

pub(crate) fn check_type(
    msg: &spindle_engine::Message,
    expected: &'static str,
) -> Result<(), ParseError> {
    let kind = require(msg, MSG_TYPE)?;
    if kind != expected {
        return Err(ParseError::UnexpectedType(kind.to_string()));
    }
    Ok(())
}
