//! Binary encoding of sessions.
//!
//! # Record layout
//!
//! All integers are big-endian.
//!
//! ```text
//! i64  creation_time
//! i64  last_accessed_time
//! i32  max_inactive_interval
//! u8   is_new
//! u8   is_valid
//! i64  this_accessed_time
//! str  id
//! u32  attribute count
//! (str name, value)*
//! ```
//!
//! `str` is a `u32` byte length followed by UTF-8. A value is a tag byte and
//! its payload; tag `0xFF` marks a value that could not be written, and the
//! attribute is dropped on read.
//!
//! # Bulk file
//!
//! The manager's unload file is an `i32` record count followed by that many
//! records.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::session::SessionData;

/// Deepest value nesting the codec will write or read.
pub const MAX_VALUE_DEPTH: usize = 64;

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_U64: u8 = 4;
const TAG_F64: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_ARRAY: u8 = 7;
const TAG_OBJECT: u8 = 8;
const TAG_NOT_SERIALIZABLE: u8 = 0xFF;

/// Converts session state to and from bytes.
pub trait SessionCodec: Send + Sync + fmt::Debug {
    /// Append one record to `out`.
    fn write_record(&self, out: &mut Vec<u8>, data: &SessionData) -> Result<()>;

    /// Read one record from the front of `input`, advancing it.
    fn read_record(&self, input: &mut &[u8]) -> Result<SessionData>;

    /// Encode a single record.
    fn encode(&self, data: &SessionData) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_record(&mut out, data)?;
        Ok(out)
    }

    /// Decode a buffer holding exactly one record.
    fn decode(&self, bytes: &[u8]) -> Result<SessionData> {
        let mut input = bytes;
        let data = self.read_record(&mut input)?;
        if !input.is_empty() {
            return Err(Error::Corrupt(format!(
                "{} trailing bytes after session {}",
                input.len(),
                data.id
            )));
        }
        Ok(data)
    }
}

/// The tagged-field codec described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl SessionCodec for BinaryCodec {
    fn write_record(&self, out: &mut Vec<u8>, data: &SessionData) -> Result<()> {
        out.extend_from_slice(&data.creation_time.to_be_bytes());
        out.extend_from_slice(&data.last_accessed_time.to_be_bytes());
        out.extend_from_slice(&data.max_inactive_interval.to_be_bytes());
        out.push(u8::from(data.is_new));
        out.push(u8::from(data.is_valid));
        out.extend_from_slice(&data.this_accessed_time.to_be_bytes());
        write_str(out, &data.id)?;
        write_len(out, data.attributes.len())?;

        for (name, value) in &data.attributes {
            write_str(out, name)?;
            if depth(value) > MAX_VALUE_DEPTH {
                warn!(
                    session_id = %data.id,
                    attribute = %name,
                    "Attribute nested too deeply to serialize, writing placeholder"
                );
                out.push(TAG_NOT_SERIALIZABLE);
            } else {
                write_value(out, value)?;
            }
        }
        Ok(())
    }

    fn read_record(&self, input: &mut &[u8]) -> Result<SessionData> {
        let mut r = Reader { input };
        let creation_time = r.i64()?;
        let last_accessed_time = r.i64()?;
        let max_inactive_interval = r.i32()?;
        let is_new = r.bool()?;
        let is_valid = r.bool()?;
        let this_accessed_time = r.i64()?;
        let id = r.string()?;
        for (field, value) in [
            ("creation_time", creation_time),
            ("last_accessed_time", last_accessed_time),
            ("this_accessed_time", this_accessed_time),
        ] {
            if value < 0 {
                return Err(Error::Corrupt(format!(
                    "session {} has negative {}: {}",
                    id, field, value
                )));
            }
        }
        let count = r.len(1)?;

        let mut attributes = BTreeMap::new();
        for _ in 0..count {
            let name = r.string()?;
            match r.value(0)? {
                Some(value) => {
                    attributes.insert(name, value);
                }
                None => {
                    warn!(session_id = %id, attribute = %name, "Skipping attribute that was not serializable");
                }
            }
        }

        Ok(SessionData {
            id,
            creation_time,
            last_accessed_time,
            this_accessed_time,
            max_inactive_interval,
            is_new,
            is_valid,
            attributes,
        })
    }
}

/// Encode a bulk unload file.
pub fn write_bulk(codec: &dyn SessionCodec, sessions: &[SessionData]) -> Result<Vec<u8>> {
    let count = i32::try_from(sessions.len())
        .map_err(|_| Error::InvalidState(format!("too many sessions ({})", sessions.len())))?;
    let mut out = Vec::new();
    out.extend_from_slice(&count.to_be_bytes());
    for data in sessions {
        codec.write_record(&mut out, data)?;
    }
    Ok(out)
}

/// Sequential reader over a bulk unload file.
///
/// Yields one result per record. After the first error the reader is
/// exhausted: a broken stream cannot be resynchronized, so the remaining
/// records of the batch are lost.
pub struct BulkReader<'a> {
    codec: &'a dyn SessionCodec,
    input: &'a [u8],
    remaining: usize,
    failed: bool,
}

impl<'a> BulkReader<'a> {
    /// Parse the count prefix.
    pub fn new(codec: &'a dyn SessionCodec, bytes: &'a [u8]) -> Result<Self> {
        let mut input = bytes;
        let count = Reader { input: &mut input }.i32()?;
        let remaining = usize::try_from(count)
            .map_err(|_| Error::Corrupt(format!("negative session count {}", count)))?;
        Ok(Self {
            codec,
            input,
            remaining,
            failed: false,
        })
    }

    /// Records still expected according to the count prefix.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for BulkReader<'_> {
    type Item = Result<SessionData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let result = self.codec.read_record(&mut self.input);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 1,
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::InvalidState(format!("length {} exceeds u32", len)))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_len(out, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(TAG_I64);
                out.extend_from_slice(&i.to_be_bytes());
            } else if let Some(u) = n.as_u64() {
                out.push(TAG_U64);
                out.extend_from_slice(&u.to_be_bytes());
            } else {
                out.push(TAG_F64);
                out.extend_from_slice(&n.as_f64().unwrap_or_default().to_be_bytes());
            }
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_str(out, s)?;
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            write_len(out, items.len())?;
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Object(map) => {
            out.push(TAG_OBJECT);
            write_len(out, map.len())?;
            for (key, item) in map {
                write_str(out, key)?;
                write_value(out, item)?;
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────────────

struct Reader<'a, 'b> {
    input: &'a mut &'b [u8],
}

impl<'b> Reader<'_, 'b> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let input: &'b [u8] = self.input;
        let Some((head, rest)) = input.split_first_chunk::<N>() else {
            return Err(Error::Corrupt(format!(
                "truncated input: needed {} bytes, {} left",
                N,
                input.len()
            )));
        };
        *self.input = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Corrupt(format!("invalid boolean byte {}", other))),
        }
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    /// A length prefix; every element occupies at least `min_item` bytes,
    /// so lengths the remaining input cannot hold are rejected up front.
    fn len(&mut self, min_item: usize) -> Result<usize> {
        let len = u32::from_be_bytes(self.take()?) as usize;
        if len.saturating_mul(min_item) > self.input.len() {
            return Err(Error::Corrupt(format!(
                "length {} exceeds remaining {} bytes",
                len,
                self.input.len()
            )));
        }
        Ok(len)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.len(1)?;
        let input: &'b [u8] = self.input;
        let (bytes, rest) = input.split_at(len);
        *self.input = rest;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Corrupt(format!("invalid UTF-8 string: {}", e)))
    }

    /// `Ok(None)` for the not-serializable placeholder.
    fn value(&mut self, depth: usize) -> Result<Option<Value>> {
        if depth >= MAX_VALUE_DEPTH {
            return Err(Error::Corrupt("value nesting too deep".to_string()));
        }
        let value = match self.u8()? {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_I64 => Value::from(self.i64()?),
            TAG_U64 => Value::from(u64::from_be_bytes(self.take()?)),
            TAG_F64 => {
                let f = f64::from_be_bytes(self.take()?);
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| Error::Corrupt(format!("non-finite number {}", f)))?
            }
            TAG_STRING => Value::String(self.string()?),
            TAG_ARRAY => {
                let len = self.len(1)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.nested(depth)?);
                }
                Value::Array(items)
            }
            TAG_OBJECT => {
                let len = self.len(5)?;
                let mut map = Map::new();
                for _ in 0..len {
                    let key = self.string()?;
                    map.insert(key, self.nested(depth)?);
                }
                Value::Object(map)
            }
            TAG_NOT_SERIALIZABLE if depth == 0 => return Ok(None),
            other => return Err(Error::Corrupt(format!("unknown value tag {:#04x}", other))),
        };
        Ok(Some(value))
    }

    fn nested(&mut self, depth: usize) -> Result<Value> {
        self.value(depth + 1)?
            .ok_or_else(|| Error::Corrupt("placeholder inside nested value".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SessionData {
        SessionData {
            id: "0A1B2C".to_string(),
            creation_time: 1_700_000_000_000,
            last_accessed_time: 1_700_000_001_000,
            this_accessed_time: 1_700_000_002_000,
            max_inactive_interval: 1800,
            is_new: false,
            is_valid: true,
            attributes: BTreeMap::new(),
        }
        .with_attribute("user", json!("ann"))
        .with_attribute("cart", json!({"items": [1, 2.5, -3], "paid": false, "note": null}))
        .with_attribute("big", json!(u64::MAX))
    }

    #[test]
    fn test_record_round_trip() {
        let data = sample();
        let bytes = BinaryCodec.encode(&data).unwrap();
        assert_eq!(BinaryCodec.decode(&bytes).unwrap(), data);
    }

    #[test]
    fn test_header_layout() {
        let data = SessionData::new("ID", 1, 30);
        let bytes = BinaryCodec.encode(&data).unwrap();
        assert_eq!(&bytes[0..8], &1i64.to_be_bytes());
        assert_eq!(&bytes[8..16], &1i64.to_be_bytes());
        assert_eq!(&bytes[16..20], &30i32.to_be_bytes());
        assert_eq!(bytes[20], 1); // is_new
        assert_eq!(bytes[21], 1); // is_valid
        assert_eq!(&bytes[30..34], &2u32.to_be_bytes());
        assert_eq!(&bytes[34..36], b"ID");
        assert_eq!(&bytes[36..40], &0u32.to_be_bytes());
        assert_eq!(bytes.len(), 40);
    }

    #[test]
    fn test_too_deep_attribute_is_dropped_on_read() {
        let mut deep = json!(1);
        for _ in 0..MAX_VALUE_DEPTH + 1 {
            deep = json!([deep]);
        }
        let data = SessionData::new("D", 0, 10)
            .with_attribute("deep", deep)
            .with_attribute("flat", json!("ok"));

        let bytes = BinaryCodec.encode(&data).unwrap();
        let decoded = BinaryCodec.decode(&bytes).unwrap();

        assert!(!decoded.attributes.contains_key("deep"));
        assert_eq!(decoded.attributes.get("flat"), Some(&json!("ok")));
    }

    #[test]
    fn test_truncated_input_is_corrupt() {
        let bytes = BinaryCodec.encode(&sample()).unwrap();
        let err = BinaryCodec.decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut bytes = BinaryCodec.encode(&SessionData::new("T", 0, 10)).unwrap();
        // attribute count = 1, name "a", bogus tag
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.push(b'a');
        bytes.push(0x42);
        assert!(BinaryCodec.decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_oversized_length_is_rejected_without_allocating() {
        let mut bytes = BinaryCodec.encode(&SessionData::new("T", 0, 10)).unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(BinaryCodec.decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut bytes = BinaryCodec.encode(&SessionData::new("T", 0, 10)).unwrap();
        bytes.push(0);
        assert!(BinaryCodec.decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_negative_timestamps_are_corrupt() {
        let data = SessionData {
            this_accessed_time: i64::MIN,
            ..SessionData::new("T", 1_000, 10)
        };
        let bytes = BinaryCodec.encode(&data).unwrap();
        let err = BinaryCodec.decode(&bytes).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("this_accessed_time"));

        let data = SessionData {
            creation_time: -5,
            ..SessionData::new("T", 1_000, 10)
        };
        let bytes = BinaryCodec.encode(&data).unwrap();
        assert!(BinaryCodec.decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_bulk_stops_at_first_broken_record() {
        let first = SessionData::new("A", 0, 10);
        let second = SessionData::new("B", 0, 10);
        let mut bytes = write_bulk(&BinaryCodec, &[first.clone(), second]).unwrap();
        // Claim a third record that is not there.
        bytes[0..4].copy_from_slice(&3i32.to_be_bytes());
        bytes.truncate(bytes.len() - 2);

        let results: Vec<_> = BulkReader::new(&BinaryCodec, &bytes).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &first);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_bulk_negative_count_is_corrupt() {
        let bytes = (-1i32).to_be_bytes();
        assert!(
            BulkReader::new(&BinaryCodec, &bytes)
                .err()
                .is_some_and(|e| e.is_corruption())
        );
    }
}
