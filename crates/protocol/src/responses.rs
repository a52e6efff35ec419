//! Partition → coordinator messages

use crate::{MSG_TYPE, ParseError, check_type, parse_i32};
use spindle_common::{NO_DEPENDENCY, TransactionStatus, TxnId};
use spindle_engine::Message;

/// A partition's answer to one [`Fragment`](crate::Fragment).
///
/// `dependency` names an earlier transaction whose speculative state this
/// response was computed over, or [`NO_DEPENDENCY`] if the partition executed
/// on committed state only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentResponse {
    pub id: TxnId,
    pub status: TransactionStatus,
    pub dependency: TxnId,
    /// Opaque result payload. Empty for a pure prepare acknowledgement.
    pub result: Vec<u8>,
}

impl FragmentResponse {
    pub const TYPE: &'static str = "fragment_response";

    /// Successful response with no dependency.
    pub fn ok(id: TxnId, result: Vec<u8>) -> Self {
        FragmentResponse {
            id,
            status: TransactionStatus::Ok,
            dependency: NO_DEPENDENCY,
            result,
        }
    }

    /// The declared dependency, if any.
    pub fn dependency(&self) -> Option<TxnId> {
        if self.dependency == NO_DEPENDENCY {
            None
        } else {
            Some(self.dependency)
        }
    }

    /// Wrap in a transport envelope.
    pub fn into_message(self) -> Message {
        Message::new(self.result, Default::default())
            .with_header(MSG_TYPE, Self::TYPE)
            .with_header("txn_id", self.id.to_string())
            .with_header("status", self.status.code().to_string())
            .with_header("dependency", self.dependency.to_string())
    }

    /// Decode from a transport envelope.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        check_type(msg, Self::TYPE)?;
        let status_code = parse_i32(msg, "status")?;
        let status =
            TransactionStatus::from_code(status_code).ok_or(ParseError::InvalidHeader {
                header: "status",
                value: status_code.to_string(),
            })?;
        Ok(FragmentResponse {
            id: parse_i32(msg, "txn_id")?,
            status,
            dependency: parse_i32(msg, "dependency")?,
            result: msg.body.clone(),
        })
    }
}
