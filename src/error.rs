use thiserror::Error;

use crate::pool::ServerAddress;
use crate::protocol::version::ProtocolVersion;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("message with signature {signature:#04x} is not supported by protocol version {version}")]
    UnsupportedMessage {
        signature: u8,
        version: ProtocolVersion,
    },

    #[error("a record request is already outstanding on this result stream")]
    ConcurrentPull,

    #[error("result stream failed: {code}: {message}")]
    StreamFailed { code: String, message: String },

    #[error("no connection pool metrics recorded for '{0}'")]
    AddressNotTracked(ServerAddress),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("message too large")]
    MessageTooLarge,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;
