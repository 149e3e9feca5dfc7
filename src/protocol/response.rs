//! Server response messages and their decoding.

use std::collections::HashMap;

use crate::error::{DriverError, DriverResult};
use crate::protocol::packstream::{PackStreamReader, PackStreamWriter};
use crate::protocol::value::Value;

pub const SUCCESS: u8 = 0x70;
pub const RECORD: u8 = 0x71;
pub const IGNORED: u8 = 0x7E;
pub const FAILURE: u8 = 0x7F;

/// One message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    /// Acknowledges the previous request. For Pull/Discard the metadata key
    /// `has_more` tells whether the result still has records pending.
    Success { metadata: HashMap<String, Value> },
    /// One result row, delivered in server emission order.
    Record { values: Vec<Value> },
    /// The request was skipped because the connection is in a failed state.
    Ignored,
    /// The request failed server-side.
    Failure { code: String, message: String },
}

impl ServerResponse {
    /// Decodes a single response envelope. Anything outside the expected
    /// grammar is a protocol violation.
    pub fn decode(bytes: &[u8]) -> DriverResult<Self> {
        let mut reader = PackStreamReader::new(bytes);
        let (size, sig) = reader.read_struct_header()?;

        let response = match (sig, size) {
            (SUCCESS, 1) => match reader.read_value()? {
                Value::Map(metadata) => ServerResponse::Success { metadata },
                other => {
                    return Err(DriverError::Protocol(format!(
                        "SUCCESS metadata must be a map, found {:?}",
                        other
                    )))
                }
            },
            (RECORD, 1) => match reader.read_value()? {
                Value::List(values) => ServerResponse::Record { values },
                other => {
                    return Err(DriverError::Protocol(format!(
                        "RECORD payload must be a list, found {:?}",
                        other
                    )))
                }
            },
            (IGNORED, 0) => ServerResponse::Ignored,
            (FAILURE, 1) => match reader.read_value()? {
                Value::Map(mut metadata) => {
                    let code = take_string(&mut metadata, "code")?;
                    let message = take_string(&mut metadata, "message")?;
                    ServerResponse::Failure { code, message }
                }
                other => {
                    return Err(DriverError::Protocol(format!(
                        "FAILURE metadata must be a map, found {:?}",
                        other
                    )))
                }
            },
            (sig, size) => {
                return Err(DriverError::Protocol(format!(
                    "unexpected response envelope: signature {:#04x} with {} fields",
                    sig, size
                )))
            }
        };

        if !reader.is_exhausted() {
            return Err(DriverError::Protocol(
                "trailing bytes after response envelope".to_string(),
            ));
        }
        Ok(response)
    }

    /// Encodes this response as an envelope. The driver itself never sends
    /// responses; this exists for test harnesses standing in for a server.
    pub fn encode(&self, out: &mut Vec<u8>) -> DriverResult<()> {
        let mut writer = PackStreamWriter::new(out);
        match self {
            ServerResponse::Success { metadata } => {
                writer.write_struct_header(1, SUCCESS)?;
                writer.write_map(metadata)?;
            }
            ServerResponse::Record { values } => {
                writer.write_struct_header(1, RECORD)?;
                writer.write_value(&Value::List(values.clone()))?;
            }
            ServerResponse::Ignored => writer.write_struct_header(0, IGNORED)?,
            ServerResponse::Failure { code, message } => {
                let mut metadata = HashMap::with_capacity(2);
                metadata.insert("code".to_string(), Value::from(code.clone()));
                metadata.insert("message".to_string(), Value::from(message.clone()));
                writer.write_struct_header(1, FAILURE)?;
                writer.write_map(&metadata)?;
            }
        }
        Ok(())
    }
}

fn take_string(metadata: &mut HashMap<String, Value>, key: &str) -> DriverResult<String> {
    match metadata.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(DriverError::Protocol(format!(
            "FAILURE '{}' must be a string, found {:?}",
            key, other
        ))),
        None => Err(DriverError::Protocol(format!(
            "FAILURE metadata missing '{}'",
            key
        ))),
    }
}
