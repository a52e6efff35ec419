//! Coordinator → partition messages

use crate::{MSG_TYPE, ParseError, check_type, parse_bool, parse_i32};
use spindle_common::TxnId;
use spindle_engine::Message;

/// One partition's slice of a transaction round.
///
/// `last_fragment` tells the partition that no more fragments will follow for
/// this transaction, i.e. this round doubles as the prepare round at that
/// partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: TxnId,
    pub multiple_partitions: bool,
    pub last_fragment: bool,
    /// Opaque per-partition work payload. Empty for a pure prepare fragment.
    pub transaction: Vec<u8>,
}

impl Fragment {
    pub const TYPE: &'static str = "fragment";

    /// Wrap in a transport envelope.
    pub fn into_message(self) -> Message {
        Message::new(self.transaction, Default::default())
            .with_header(MSG_TYPE, Self::TYPE)
            .with_header("txn_id", self.id.to_string())
            .with_header(
                "multiple_partitions",
                if self.multiple_partitions { "true" } else { "false" },
            )
            .with_header(
                "last_fragment",
                if self.last_fragment { "true" } else { "false" },
            )
    }

    /// Decode from a transport envelope.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        check_type(msg, Self::TYPE)?;
        Ok(Fragment {
            id: parse_i32(msg, "txn_id")?,
            multiple_partitions: parse_bool(msg, "multiple_partitions")?,
            last_fragment: parse_bool(msg, "last_fragment")?,
            transaction: msg.body.clone(),
        })
    }
}

/// The commit/abort decision for a multi-partition transaction. Sent to every
/// participant after the prepare round (commit) or as soon as the abort is
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitDecision {
    pub id: TxnId,
    pub commit: bool,
}

impl CommitDecision {
    pub const TYPE: &'static str = "commit_decision";

    /// Wrap in a transport envelope. Decisions carry no body.
    pub fn into_message(self) -> Message {
        Message::with_body(Vec::new())
            .with_header(MSG_TYPE, Self::TYPE)
            .with_header("txn_id", self.id.to_string())
            .with_header("commit", if self.commit { "true" } else { "false" })
    }

    /// Decode from a transport envelope.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        check_type(msg, Self::TYPE)?;
        Ok(CommitDecision {
            id: parse_i32(msg, "txn_id")?,
            commit: parse_bool(msg, "commit")?,
        })
    }
}
