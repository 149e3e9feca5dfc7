//! Message encoding against a negotiated protocol version.

use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::protocol::message::{count_metadata, Message};
use crate::protocol::packstream::PackStreamWriter;
use crate::protocol::version::ProtocolVersion;

/// Encodes request messages for one negotiated protocol version.
///
/// Carries no mutable state, so a single writer can be shared read-only
/// across every connection negotiated to the same version.
#[derive(Debug, Clone, Copy)]
pub struct MessageWriter {
    version: ProtocolVersion,
}

impl MessageWriter {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Serializes one message as a structured envelope: a structure header
    /// carrying the variant's field count and signature opcode, followed by
    /// the variant's fields in order.
    ///
    /// Fails with [`DriverError::UnsupportedMessage`] when the variant is not
    /// registered for this version; that is a negotiation or construction
    /// bug, never something to retry.
    pub fn encode(&self, message: &Message, out: &mut Vec<u8>) -> DriverResult<()> {
        let sig = message.signature();
        if !self.version.supports(sig) {
            return Err(DriverError::UnsupportedMessage {
                signature: sig,
                version: self.version,
            });
        }

        let mut writer = PackStreamWriter::new(out);
        match message {
            Message::Hello { metadata } | Message::Begin { metadata } => {
                writer.write_struct_header(1, sig)?;
                writer.write_map(metadata)?;
            }
            Message::Goodbye | Message::Reset | Message::Commit | Message::Rollback => {
                writer.write_struct_header(0, sig)?;
            }
            Message::Run {
                query,
                parameters,
                metadata,
            } => {
                writer.write_struct_header(3, sig)?;
                writer.write_string(query)?;
                writer.write_map(parameters)?;
                writer.write_map(metadata)?;
            }
            Message::Pull { n, stmt_id } | Message::Discard { n, stmt_id } => {
                writer.write_struct_header(1, sig)?;
                writer.write_map(&count_metadata(*n, *stmt_id))?;
            }
        }

        debug!(message = message.name(), version = %self.version, "encoded message");
        Ok(())
    }
}
