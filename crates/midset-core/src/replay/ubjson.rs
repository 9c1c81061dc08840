//! Minimal UBJSON reader for the replay metadata block.
//!
//! Values are decoded into [`serde_json::Value`] so callers can pick
//! fields with the usual `get`/`as_*` accessors. Supports the scalar
//! markers, strings, and both plain and optimized (`$`/`#`) containers.

use serde_json::{Map, Number, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UbjsonError {
    #[error("unexpected end of metadata at byte {0}")]
    UnexpectedEof(usize),
    #[error("invalid marker 0x{marker:02x} at byte {offset}")]
    InvalidMarker { marker: u8, offset: usize },
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("invalid UTF-8 in string at byte {0}")]
    InvalidUtf8(usize),
    #[error("metadata nested too deeply")]
    TooDeep,
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], UbjsonError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(UbjsonError::UnexpectedEof(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, UbjsonError> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Consume `expected` if it is the next byte.
    pub(crate) fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_bytes(&mut self, expected: &[u8]) -> Result<(), UbjsonError> {
        let start = self.pos;
        let got = self.take(expected.len())?;
        if got != expected {
            return Err(UbjsonError::InvalidMarker {
                marker: got.first().copied().unwrap_or(0),
                offset: start,
            });
        }
        Ok(())
    }

    /// Read a full value, starting at its type marker.
    pub(crate) fn value(&mut self) -> Result<Value, UbjsonError> {
        self.value_at_depth(0)
    }

    fn value_at_depth(&mut self, depth: usize) -> Result<Value, UbjsonError> {
        loop {
            let offset = self.pos;
            let marker = self.byte()?;
            if marker == b'N' {
                continue;
            }
            return self.typed_value(marker, offset, depth);
        }
    }

    fn typed_value(&mut self, marker: u8, offset: usize, depth: usize) -> Result<Value, UbjsonError> {
        if depth > MAX_DEPTH {
            return Err(UbjsonError::TooDeep);
        }
        let value = match marker {
            b'Z' => Value::Null,
            b'T' => Value::Bool(true),
            b'F' => Value::Bool(false),
            b'i' | b'U' | b'I' | b'l' | b'L' => Value::from(self.integer(marker, offset)?),
            b'd' => {
                let b = self.take(4)?;
                float_value(f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
            }
            b'D' => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                float_value(f64::from_be_bytes(raw))
            }
            b'C' => Value::String((self.byte()? as char).to_string()),
            b'S' | b'H' => Value::String(self.string()?),
            b'[' => self.array(depth)?,
            b'{' => self.object(depth)?,
            other => {
                return Err(UbjsonError::InvalidMarker {
                    marker: other,
                    offset,
                })
            }
        };
        Ok(value)
    }

    fn integer(&mut self, marker: u8, offset: usize) -> Result<i64, UbjsonError> {
        let v = match marker {
            b'i' => self.byte()? as i8 as i64,
            b'U' => self.byte()? as i64,
            b'I' => {
                let b = self.take(2)?;
                i16::from_be_bytes([b[0], b[1]]) as i64
            }
            b'l' => {
                let b = self.take(4)?;
                i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64
            }
            b'L' => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                i64::from_be_bytes(raw)
            }
            other => {
                return Err(UbjsonError::InvalidMarker {
                    marker: other,
                    offset,
                })
            }
        };
        Ok(v)
    }

    /// A length prefix: an integer value with its own marker.
    fn length(&mut self) -> Result<usize, UbjsonError> {
        let offset = self.pos;
        let marker = self.byte()?;
        let len = self.integer(marker, offset)?;
        usize::try_from(len).map_err(|_| UbjsonError::InvalidLength(len))
    }

    fn string(&mut self) -> Result<String, UbjsonError> {
        let len = self.length()?;
        let start = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| UbjsonError::InvalidUtf8(start))
    }

    /// Optional `$<type>` and `#<count>` headers of an optimized container.
    fn container_header(&mut self) -> Result<(Option<u8>, Option<usize>), UbjsonError> {
        let elem_type = if self.eat(b'$') {
            Some(self.byte()?)
        } else {
            None
        };
        let count = if self.eat(b'#') {
            let n = self.length()?;
            // Every counted element or entry occupies at least one byte.
            if n > self.buf.len() - self.pos {
                return Err(UbjsonError::InvalidLength(n as i64));
            }
            Some(n)
        } else {
            None
        };
        Ok((elem_type, count))
    }

    fn element(&mut self, elem_type: Option<u8>, depth: usize) -> Result<Value, UbjsonError> {
        match elem_type {
            Some(marker) => {
                let offset = self.pos;
                self.typed_value(marker, offset, depth + 1)
            }
            None => self.value_at_depth(depth + 1),
        }
    }

    fn array(&mut self, depth: usize) -> Result<Value, UbjsonError> {
        let offset = self.pos;
        let (elem_type, count) = self.container_header()?;
        if let (Some(marker @ (b'Z' | b'T' | b'F' | b'N')), Some(_)) = (elem_type, count) {
            return Err(UbjsonError::InvalidMarker { marker, offset });
        }
        let mut items = Vec::new();
        match count {
            Some(n) => {
                for _ in 0..n {
                    items.push(self.element(elem_type, depth)?);
                }
            }
            None => {
                while !self.eat(b']') {
                    if self.is_at_end() {
                        return Err(UbjsonError::UnexpectedEof(self.pos));
                    }
                    items.push(self.element(elem_type, depth)?);
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self, depth: usize) -> Result<Value, UbjsonError> {
        let (elem_type, count) = self.container_header()?;
        let mut map = Map::new();
        match count {
            Some(n) => {
                for _ in 0..n {
                    let key = self.string()?;
                    let value = self.element(elem_type, depth)?;
                    map.insert(key, value);
                }
            }
            None => {
                while !self.eat(b'}') {
                    if self.is_at_end() {
                        return Err(UbjsonError::UnexpectedEof(self.pos));
                    }
                    let key = self.string()?;
                    let value = self.element(elem_type, depth)?;
                    map.insert(key, value);
                }
            }
        }
        Ok(Value::Object(map))
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(out: &mut Vec<u8>, k: &str) {
        out.push(b'U');
        out.push(k.len() as u8);
        out.extend_from_slice(k.as_bytes());
    }

    #[test]
    fn test_object_with_mixed_values() {
        let mut buf = vec![b'{'];
        key(&mut buf, "startAt");
        buf.extend_from_slice(b"SU\x142018-06-22T07:52:59Z");
        key(&mut buf, "lastFrame");
        buf.push(b'l');
        buf.extend_from_slice(&5209i32.to_be_bytes());
        key(&mut buf, "ok");
        buf.push(b'T');
        key(&mut buf, "none");
        buf.push(b'Z');
        buf.push(b'}');

        let value = Reader::new(&buf).value().unwrap();
        assert_eq!(
            value,
            json!({
                "startAt": "2018-06-22T07:52:59Z",
                "lastFrame": 5209,
                "ok": true,
                "none": null
            })
        );
    }

    #[test]
    fn test_optimized_array() {
        let buf = b"[$U#U\x03\x01\x02\x03";
        let value = Reader::new(buf).value().unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn test_noop_and_nested() {
        let mut buf = vec![b'N', b'{'];
        key(&mut buf, "players");
        buf.push(b'[');
        buf.extend_from_slice(b"i\xff");
        buf.push(b'D');
        buf.extend_from_slice(&1.5f64.to_be_bytes());
        buf.push(b']');
        buf.push(b'}');
        let value = Reader::new(&buf).value().unwrap();
        assert_eq!(value, json!({"players": [-1, 1.5]}));
    }

    #[test]
    fn test_truncated_string() {
        let err = Reader::new(b"SU\x10abc").value().unwrap_err();
        assert_eq!(err, UbjsonError::UnexpectedEof(3));
    }

    #[test]
    fn test_unknown_marker() {
        let err = Reader::new(b"?").value().unwrap_err();
        assert_eq!(err, UbjsonError::InvalidMarker { marker: b'?', offset: 0 });
    }

    #[test]
    fn test_zero_width_counted_array_rejected() {
        let mut buf = b"[$Z#L".to_vec();
        buf.extend_from_slice(&i64::MAX.to_be_bytes());
        assert!(Reader::new(&buf).value().is_err());

        let mut buf = b"[$T#l".to_vec();
        buf.extend_from_slice(&5_000_000i32.to_be_bytes());
        assert!(matches!(
            Reader::new(&buf).value(),
            Err(UbjsonError::InvalidMarker { marker: b'T', .. })
        ));
    }

    #[test]
    fn test_count_larger_than_input_rejected() {
        let buf = b"[$U#U\x05\x01\x02";
        assert_eq!(Reader::new(buf).value(), Err(UbjsonError::InvalidLength(5)));

        let mut buf = b"{#l".to_vec();
        buf.extend_from_slice(&1_000_000i32.to_be_bytes());
        assert_eq!(
            Reader::new(&buf).value(),
            Err(UbjsonError::InvalidLength(1_000_000))
        );
    }

    #[test]
    fn test_unterminated_object() {
        let mut buf = vec![b'{'];
        key(&mut buf, "a");
        buf.push(b'T');
        assert!(matches!(
            Reader::new(&buf).value(),
            Err(UbjsonError::UnexpectedEof(_))
        ));
    }
}
