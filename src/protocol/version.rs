//! Negotiated protocol versions and per-version message legality.

use std::fmt;

use crate::protocol::message::signature;

/// A negotiated major/minor protocol version.
///
/// Version selection happens during the connection handshake, before any
/// message is encoded; once a connection is established its version never
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const V3_0: Self = Self { major: 3, minor: 0 };
    pub const V4_0: Self = Self { major: 4, minor: 0 };
    pub const V4_1: Self = Self { major: 4, minor: 1 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Explicit record-count flow control (Pull/Discard carrying `n`)
    /// arrived with version 4.0.
    pub fn supports_explicit_flow_control(&self) -> bool {
        self.major >= 4
    }

    /// Whether a message with the given signature may be sent on a
    /// connection negotiated to this version.
    pub fn supports(&self, sig: u8) -> bool {
        match sig {
            signature::PULL | signature::DISCARD => self.supports_explicit_flow_control(),
            signature::HELLO
            | signature::GOODBYE
            | signature::RESET
            | signature::RUN
            | signature::BEGIN
            | signature::COMMIT
            | signature::ROLLBACK => self.major >= 3,
            _ => false,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
