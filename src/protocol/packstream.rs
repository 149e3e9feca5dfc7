//! Binary serialization of structured values (PackStream grammar).
//!
//! Every message body on the wire is a structure header followed by packed
//! values. The writer always picks the smallest marker that fits, so a given
//! value packs to the same bytes on every call (map key order aside, since
//! maps carry no order on the wire).

use std::collections::HashMap;

use crate::error::{DriverError, DriverResult};
use crate::protocol::value::Value;

const MARKER_NULL: u8 = 0xC0;
const MARKER_FLOAT: u8 = 0xC1;
const MARKER_FALSE: u8 = 0xC2;
const MARKER_TRUE: u8 = 0xC3;
const MARKER_INT_8: u8 = 0xC8;
const MARKER_INT_16: u8 = 0xC9;
const MARKER_INT_32: u8 = 0xCA;
const MARKER_INT_64: u8 = 0xCB;
const MARKER_BYTES_8: u8 = 0xCC;
const MARKER_BYTES_16: u8 = 0xCD;
const MARKER_BYTES_32: u8 = 0xCE;
const MARKER_STRING_8: u8 = 0xD0;
const MARKER_STRING_16: u8 = 0xD1;
const MARKER_STRING_32: u8 = 0xD2;
const MARKER_LIST_8: u8 = 0xD4;
const MARKER_LIST_16: u8 = 0xD5;
const MARKER_LIST_32: u8 = 0xD6;
const MARKER_MAP_8: u8 = 0xD8;
const MARKER_MAP_16: u8 = 0xD9;
const MARKER_MAP_32: u8 = 0xDA;

const TINY_STRING: u8 = 0x80;
const TINY_LIST: u8 = 0x90;
const TINY_MAP: u8 = 0xA0;
const TINY_STRUCT: u8 = 0xB0;

/// Largest collection the 32-bit size markers can describe.
const MAX_SIZE_32: usize = u32::MAX as usize;

/// Writes packed values into a byte buffer.
pub struct PackStreamWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> PackStreamWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Writes a structure header: field count plus the signature opcode.
    ///
    /// Structures on the wire are always tiny (at most 15 fields).
    pub fn write_struct_header(&mut self, size: usize, signature: u8) -> DriverResult<()> {
        if size > 0x0F {
            return Err(DriverError::Protocol(format!(
                "structure with {} fields exceeds the wire limit of 15",
                size
            )));
        }
        self.buf.push(TINY_STRUCT | size as u8);
        self.buf.push(signature);
        Ok(())
    }

    pub fn write_value(&mut self, value: &Value) -> DriverResult<()> {
        match value {
            Value::Null => self.buf.push(MARKER_NULL),
            Value::Boolean(true) => self.buf.push(MARKER_TRUE),
            Value::Boolean(false) => self.buf.push(MARKER_FALSE),
            Value::Integer(i) => self.write_integer(*i),
            Value::Float(f) => {
                self.buf.push(MARKER_FLOAT);
                self.buf.extend_from_slice(&f.to_be_bytes());
            }
            Value::Bytes(bytes) => self.write_bytes(bytes)?,
            Value::String(s) => self.write_string(s)?,
            Value::List(items) => {
                self.write_size(items.len(), TINY_LIST, MARKER_LIST_8)?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(entries) => self.write_map(entries)?,
            Value::Structure { signature, fields } => {
                self.write_struct_header(fields.len(), *signature)?;
                for field in fields {
                    self.write_value(field)?;
                }
            }
        }
        Ok(())
    }

    pub fn write_map(&mut self, entries: &HashMap<String, Value>) -> DriverResult<()> {
        self.write_size(entries.len(), TINY_MAP, MARKER_MAP_8)?;
        for (key, value) in entries {
            self.write_string(key)?;
            self.write_value(value)?;
        }
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> DriverResult<()> {
        self.write_size(s.len(), TINY_STRING, MARKER_STRING_8)?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> DriverResult<()> {
        // Byte arrays have no tiny form; sizes start at the 8-bit marker.
        match bytes.len() {
            len if len <= 0xFF => {
                self.buf.push(MARKER_BYTES_8);
                self.buf.push(len as u8);
            }
            len if len <= 0xFFFF => {
                self.buf.push(MARKER_BYTES_16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len if len <= MAX_SIZE_32 => {
                self.buf.push(MARKER_BYTES_32);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            len => {
                return Err(DriverError::Protocol(format!(
                    "byte array of {} bytes exceeds the wire size limit",
                    len
                )))
            }
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_integer(&mut self, i: i64) {
        if (-16..=127).contains(&i) {
            self.buf.push(i as i8 as u8);
        } else if i8::try_from(i).is_ok() {
            self.buf.push(MARKER_INT_8);
            self.buf.push(i as i8 as u8);
        } else if i16::try_from(i).is_ok() {
            self.buf.push(MARKER_INT_16);
            self.buf.extend_from_slice(&(i as i16).to_be_bytes());
        } else if i32::try_from(i).is_ok() {
            self.buf.push(MARKER_INT_32);
            self.buf.extend_from_slice(&(i as i32).to_be_bytes());
        } else {
            self.buf.push(MARKER_INT_64);
            self.buf.extend_from_slice(&i.to_be_bytes());
        }
    }

    /// Writes a size prefix for strings, lists and maps, which share the
    /// tiny/8/16/32 marker progression.
    fn write_size(&mut self, size: usize, tiny_marker: u8, marker_8: u8) -> DriverResult<()> {
        match size {
            len if len < 0x10 => self.buf.push(tiny_marker | len as u8),
            len if len <= 0xFF => {
                self.buf.push(marker_8);
                self.buf.push(len as u8);
            }
            len if len <= 0xFFFF => {
                self.buf.push(marker_8 + 1);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len if len <= MAX_SIZE_32 => {
                self.buf.push(marker_8 + 2);
                self.buf.extend_from_slice(&(len as u32).to_be_bytes());
            }
            len => {
                return Err(DriverError::Protocol(format!(
                    "collection of {} entries exceeds the wire size limit",
                    len
                )))
            }
        }
        Ok(())
    }
}

/// Reads packed values back out of a byte slice.
pub struct PackStreamReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PackStreamReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// True once every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_struct_header(&mut self) -> DriverResult<(usize, u8)> {
        let marker = self.read_u8()?;
        if marker & 0xF0 != TINY_STRUCT {
            return Err(DriverError::Protocol(format!(
                "expected structure header, found marker {:#04x}",
                marker
            )));
        }
        let size = (marker & 0x0F) as usize;
        let signature = self.read_u8()?;
        Ok((size, signature))
    }

    pub fn read_value(&mut self) -> DriverResult<Value> {
        let marker = self.read_u8()?;
        let value = match marker {
            0x00..=0x7F => Value::Integer(i64::from(marker)),
            0xF0..=0xFF => Value::Integer(i64::from(marker as i8)),
            MARKER_NULL => Value::Null,
            MARKER_TRUE => Value::Boolean(true),
            MARKER_FALSE => Value::Boolean(false),
            MARKER_FLOAT => Value::Float(f64::from_be_bytes(self.read_array::<8>()?)),
            MARKER_INT_8 => Value::Integer(i64::from(self.read_u8()? as i8)),
            MARKER_INT_16 => Value::Integer(i64::from(i16::from_be_bytes(self.read_array::<2>()?))),
            MARKER_INT_32 => Value::Integer(i64::from(i32::from_be_bytes(self.read_array::<4>()?))),
            MARKER_INT_64 => Value::Integer(i64::from_be_bytes(self.read_array::<8>()?)),
            MARKER_BYTES_8 | MARKER_BYTES_16 | MARKER_BYTES_32 => {
                let len = self.read_sized_length(marker - MARKER_BYTES_8)?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            m if m & 0xF0 == TINY_STRING => self.read_string_body((m & 0x0F) as usize)?,
            MARKER_STRING_8 | MARKER_STRING_16 | MARKER_STRING_32 => {
                let len = self.read_sized_length(marker - MARKER_STRING_8)?;
                self.read_string_body(len)?
            }
            m if m & 0xF0 == TINY_LIST => self.read_list_body((m & 0x0F) as usize)?,
            MARKER_LIST_8 | MARKER_LIST_16 | MARKER_LIST_32 => {
                let len = self.read_sized_length(marker - MARKER_LIST_8)?;
                self.read_list_body(len)?
            }
            m if m & 0xF0 == TINY_MAP => self.read_map_body((m & 0x0F) as usize)?,
            MARKER_MAP_8 | MARKER_MAP_16 | MARKER_MAP_32 => {
                let len = self.read_sized_length(marker - MARKER_MAP_8)?;
                self.read_map_body(len)?
            }
            m if m & 0xF0 == TINY_STRUCT => {
                let signature = self.read_u8()?;
                let size = (m & 0x0F) as usize;
                let mut fields = Vec::with_capacity(size);
                for _ in 0..size {
                    fields.push(self.read_value()?);
                }
                Value::Structure { signature, fields }
            }
            m => {
                return Err(DriverError::Protocol(format!(
                    "unknown value marker {:#04x}",
                    m
                )))
            }
        };
        Ok(value)
    }

    fn read_string_body(&mut self, len: usize) -> DriverResult<Value> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| DriverError::Protocol(format!("invalid UTF-8 in string: {}", e)))?;
        Ok(Value::String(s.to_string()))
    }

    fn read_list_body(&mut self, len: usize) -> DriverResult<Value> {
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(Value::List(items))
    }

    fn read_map_body(&mut self, len: usize) -> DriverResult<Value> {
        let mut entries = HashMap::with_capacity(len.min(64));
        for _ in 0..len {
            let key = match self.read_value()? {
                Value::String(s) => s,
                other => {
                    return Err(DriverError::Protocol(format!(
                        "map key must be a string, found {:?}",
                        other
                    )))
                }
            };
            entries.insert(key, self.read_value()?);
        }
        Ok(Value::Map(entries))
    }

    /// Reads a u8/u16/u32 length, selected by how many marker steps past the
    /// 8-bit form the original marker sat.
    fn read_sized_length(&mut self, width: u8) -> DriverResult<usize> {
        Ok(match width {
            0 => usize::from(self.read_u8()?),
            1 => usize::from(u16::from_be_bytes(self.read_array::<2>()?)),
            _ => u32::from_be_bytes(self.read_array::<4>()?) as usize,
        })
    }

    fn read_u8(&mut self) -> DriverResult<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| DriverError::Protocol("unexpected end of message".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> DriverResult<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take(&mut self, n: usize) -> DriverResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(DriverError::Protocol(
                "unexpected end of message".to_string(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
