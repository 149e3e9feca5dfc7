//! Request messages sent to the server.
//!
//! A closed set of variants, each identified by a one-byte signature opcode.
//! Which variants are legal on a connection depends on the negotiated
//! protocol version (see [`version`](crate::protocol::version)).

use std::collections::HashMap;

use crate::protocol::value::Value;

/// Sentinel statement id meaning "no explicit id / the current statement".
pub const ABSENT_STATEMENT_ID: i64 = -1;

/// Count requesting every remaining record.
pub const FETCH_ALL: i64 = -1;

/// Signature opcodes, one per message variant.
pub mod signature {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
}

/// A request message ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Opens the logical connection, carrying client metadata.
    Hello { metadata: HashMap<String, Value> },
    /// Closes the logical connection. No response expected.
    Goodbye,
    /// Returns the connection to a clean state after a failure.
    Reset,
    /// Submits a query with parameters and transaction metadata.
    Run {
        query: String,
        parameters: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
    },
    /// Starts an explicit transaction.
    Begin { metadata: HashMap<String, Value> },
    Commit,
    Rollback,
    /// Requests up to `n` records from the statement's result (`-1` = all).
    Pull { n: i64, stmt_id: i64 },
    /// Discards up to `n` records from the statement's result (`-1` = all).
    Discard { n: i64, stmt_id: i64 },
}

impl Message {
    pub fn signature(&self) -> u8 {
        match self {
            Message::Hello { .. } => signature::HELLO,
            Message::Goodbye => signature::GOODBYE,
            Message::Reset => signature::RESET,
            Message::Run { .. } => signature::RUN,
            Message::Begin { .. } => signature::BEGIN,
            Message::Commit => signature::COMMIT,
            Message::Rollback => signature::ROLLBACK,
            Message::Discard { .. } => signature::DISCARD,
            Message::Pull { .. } => signature::PULL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "HELLO",
            Message::Goodbye => "GOODBYE",
            Message::Reset => "RESET",
            Message::Run { .. } => "RUN",
            Message::Begin { .. } => "BEGIN",
            Message::Commit => "COMMIT",
            Message::Rollback => "ROLLBACK",
            Message::Discard { .. } => "DISCARD",
            Message::Pull { .. } => "PULL",
        }
    }
}

/// Builds the metadata map shared by Pull and Discard.
///
/// `n` is always present; `stmt_id` only when the caller supplied an id other
/// than [`ABSENT_STATEMENT_ID`].
pub fn count_metadata(n: i64, stmt_id: i64) -> HashMap<String, Value> {
    let mut metadata = HashMap::with_capacity(2);
    metadata.insert("n".to_string(), Value::Integer(n));
    if stmt_id != ABSENT_STATEMENT_ID {
        metadata.insert("stmt_id".to_string(), Value::Integer(stmt_id));
    }
    metadata
}
