//! AMF0 encoding and decoding
//!
//! AMF0 is the binary value encoding carried by FLV script tags. The muxer
//! only ever writes the `onMetaData` payload (a string followed by an ECMA
//! array), and the relay puller reads the upstream `onMetaData` back to
//! recover track properties, so this module covers the scalar types plus
//! objects and ECMA arrays.
//!
//! Wire contract for ECMA arrays: marker byte 0x08, a 4-byte big-endian
//! entry count that must equal the number of (name, value) pairs actually
//! written, the pairs themselves, then the end-of-object sequence
//! 0x00 0x00 0x09.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmfError;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// An AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Anonymous object: ordered (name, value) pairs
    Object(Vec<(String, AmfValue)>),
    /// ECMA (associative) array: ordered (name, value) pairs
    EcmaArray(Vec<(String, AmfValue)>),
    Null,
    Undefined,
}

impl AmfValue {
    /// Numeric view of this value, if it has one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The (name, value) pairs of an object or ECMA array
    pub fn entries(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(e) | AmfValue::EcmaArray(e) => Some(e),
            _ => None,
        }
    }

    /// Look up a named entry in an object or ECMA array
    pub fn get(&self, name: &str) -> Option<&AmfValue> {
        self.entries()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

/// Write a bare UTF-8 string (16-bit length prefix, no marker).
///
/// Used for entry names inside objects and for the script tag's leading
/// `"onMetaData"` string, which AMF0 encodes with the string marker.
fn put_utf8(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Write a marked AMF0 string value
pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(MARKER_STRING);
    put_utf8(buf, s);
}

/// Write a marked AMF0 number value (IEEE 754 double)
pub fn put_number(buf: &mut BytesMut, n: f64) {
    buf.put_u8(MARKER_NUMBER);
    buf.put_f64(n);
}

/// Write a marked AMF0 boolean value
pub fn put_boolean(buf: &mut BytesMut, b: bool) {
    buf.put_u8(MARKER_BOOLEAN);
    buf.put_u8(b as u8);
}

/// Write any AMF0 value
pub fn put_value(buf: &mut BytesMut, value: &AmfValue) {
    match value {
        AmfValue::Number(n) => put_number(buf, *n),
        AmfValue::Boolean(b) => put_boolean(buf, *b),
        AmfValue::String(s) => put_string(buf, s),
        AmfValue::Object(entries) => {
            buf.put_u8(MARKER_OBJECT);
            put_entries(buf, entries);
        }
        AmfValue::EcmaArray(entries) => put_ecma_array(buf, entries),
        AmfValue::Null => buf.put_u8(MARKER_NULL),
        AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
    }
}

/// Write an ECMA array with an explicit entry count.
///
/// The declared count is derived from the slice length, so it always
/// matches the pairs written.
pub fn put_ecma_array(buf: &mut BytesMut, entries: &[(String, AmfValue)]) {
    buf.put_u8(MARKER_ECMA_ARRAY);
    buf.put_u32(entries.len() as u32);
    put_entries(buf, entries);
}

fn put_entries(buf: &mut BytesMut, entries: &[(String, AmfValue)]) {
    for (name, value) in entries {
        put_utf8(buf, name);
        put_value(buf, value);
    }
    // End-of-object: empty name followed by the end marker
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

/// Decode a single AMF0 value from the front of `buf`
pub fn decode_value(buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    decode_at_depth(buf, 0)
}

fn decode_at_depth(buf: &mut Bytes, depth: usize) -> Result<AmfValue, AmfError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(AmfError::NestingTooDeep);
    }
    if buf.is_empty() {
        return Err(AmfError::UnexpectedEof);
    }
    match buf.get_u8() {
        MARKER_NUMBER => {
            if buf.remaining() < 8 {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(decode_utf8(buf)?)),
        MARKER_OBJECT => Ok(AmfValue::Object(decode_entries(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            if buf.remaining() < 4 {
                return Err(AmfError::UnexpectedEof);
            }
            // The declared count is advisory on read: entries are delimited
            // by the end-of-object sequence.
            let _declared = buf.get_u32();
            Ok(AmfValue::EcmaArray(decode_entries(buf, depth)?))
        }
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_UNDEFINED => Ok(AmfValue::Undefined),
        other => Err(AmfError::UnknownMarker(other)),
    }
}

fn decode_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidString)
}

fn decode_entries(buf: &mut Bytes, depth: usize) -> Result<Vec<(String, AmfValue)>, AmfError> {
    let mut entries = Vec::new();
    loop {
        let name = decode_utf8(buf)?;
        if name.is_empty() {
            if buf.is_empty() {
                return Err(AmfError::UnexpectedEof);
            }
            match buf.get_u8() {
                MARKER_OBJECT_END => return Ok(entries),
                other => return Err(AmfError::UnknownMarker(other)),
            }
        }
        let value = decode_at_depth(buf, depth + 1)?;
        entries.push((name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_string_wire_format() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "onMetaData");
        assert_eq!(buf[0], MARKER_STRING);
        assert_eq!(&buf[1..3], &[0x00, 0x0A]);
        assert_eq!(&buf[3..], b"onMetaData");
    }

    #[test]
    fn test_put_number_wire_format() {
        let mut buf = BytesMut::new();
        put_number(&mut buf, 1.0);
        assert_eq!(
            &buf[..],
            &[0x00, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_put_boolean_wire_format() {
        let mut buf = BytesMut::new();
        put_boolean(&mut buf, true);
        put_boolean(&mut buf, false);
        assert_eq!(&buf[..], &[0x01, 0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_ecma_array_count_and_terminator() {
        let entries = vec![
            ("duration".to_string(), AmfValue::Number(0.0)),
            ("hasVideo".to_string(), AmfValue::Boolean(true)),
        ];
        let mut buf = BytesMut::new();
        put_ecma_array(&mut buf, &entries);

        assert_eq!(buf[0], MARKER_ECMA_ARRAY);
        assert_eq!(&buf[1..5], &[0, 0, 0, 2]); // big-endian entry count
        let len = buf.len();
        assert_eq!(&buf[len - 3..], &[0x00, 0x00, 0x09]);
    }

    #[test]
    fn test_scalar_roundtrip() {
        for value in [
            AmfValue::Number(42.5),
            AmfValue::Boolean(true),
            AmfValue::String("stereo".to_string()),
            AmfValue::Null,
            AmfValue::Undefined,
        ] {
            let mut buf = BytesMut::new();
            put_value(&mut buf, &value);
            let mut bytes = buf.freeze();
            assert_eq!(decode_value(&mut bytes).unwrap(), value);
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn test_ecma_array_roundtrip_preserves_key_value_set() {
        // Two encodings with different pair order decode to the same set.
        let forward = vec![
            ("width".to_string(), AmfValue::Number(1920.0)),
            ("height".to_string(), AmfValue::Number(1080.0)),
            ("stereo".to_string(), AmfValue::Boolean(true)),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        for encoding in [&forward, &reversed] {
            let mut buf = BytesMut::new();
            put_ecma_array(&mut buf, encoding);
            let decoded = decode_value(&mut buf.freeze()).unwrap();
            for (name, value) in &forward {
                assert_eq!(decoded.get(name), Some(value));
            }
            assert_eq!(decoded.entries().unwrap().len(), forward.len());
        }
    }

    #[test]
    fn test_nested_object_roundtrip() {
        let value = AmfValue::Object(vec![(
            "inner".to_string(),
            AmfValue::Object(vec![("n".to_string(), AmfValue::Number(1.0))]),
        )]);
        let mut buf = BytesMut::new();
        put_value(&mut buf, &value);
        assert_eq!(decode_value(&mut buf.freeze()).unwrap(), value);
    }

    #[test]
    fn test_decode_truncated_input() {
        let mut short = Bytes::from_static(&[MARKER_NUMBER, 0x3F, 0xF0]);
        assert!(matches!(
            decode_value(&mut short),
            Err(AmfError::UnexpectedEof)
        ));

        let mut empty = Bytes::new();
        assert!(matches!(
            decode_value(&mut empty),
            Err(AmfError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_decode_unknown_marker() {
        let mut buf = Bytes::from_static(&[0x42]);
        assert!(matches!(
            decode_value(&mut buf),
            Err(AmfError::UnknownMarker(0x42))
        ));
    }
}
