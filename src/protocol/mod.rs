//! Wire protocol for the driver: structured values, request messages,
//! per-version encoding and server response decoding.
//!
//! # Envelope
//!
//! Every message travels as a structured envelope:
//! `[struct header: field count][signature opcode: 1 byte][fields...]`
//! with fields packed in the PackStream grammar. Signature opcodes are
//! version-scoped constants; encoding validates that the variant is legal
//! for the connection's negotiated version.

pub mod encoder;
pub mod message;
pub mod packstream;
pub mod response;
pub mod value;
pub mod version;

pub use encoder::MessageWriter;
pub use message::{count_metadata, signature, Message, ABSENT_STATEMENT_ID, FETCH_ALL};
pub use response::ServerResponse;
pub use value::Value;
pub use version::ProtocolVersion;
