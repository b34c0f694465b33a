//! Encoding and decoding for Zero elements.
//!
//! Encoding writes into a growable buffer that starts at
//! [`BUFFER_CHUNK_SIZE`] bytes and grows by the larger of one chunk or the
//! exact overflow. Decoding validates every declared length against the
//! bytes actually left before allocating anything.

use crate::element::{ZeroArray, ZeroElement, ZeroMap, ZeroType};
use crate::ZeroError;
use bytes::{BufMut, Bytes};
use std::collections::HashSet;

/// Initial size and minimum growth step of the encode buffer
pub const BUFFER_CHUNK_SIZE: usize = 512;

/// Smallest valid message: tag plus a 2-byte count
pub const MIN_MESSAGE_SIZE: usize = 3;

/// Deepest composite nesting the decoder accepts
pub const MAX_DEPTH: usize = 128;

const MAX_SHORT_LEN: usize = i16::MAX as usize;
const MAX_INT_LEN: usize = i32::MAX as usize;

/// Output buffer with chunked growth
#[derive(Debug)]
pub struct GrowableBuffer {
    buf: Vec<u8>,
}

impl GrowableBuffer {
    /// Create a buffer with one chunk of capacity
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(BUFFER_CHUNK_SIZE),
        }
    }

    /// Make room for `additional` bytes
    fn ensure(&mut self, additional: usize) {
        let free = self.buf.capacity() - self.buf.len();
        if additional > free {
            let overflow = additional - free;
            let target = self.buf.capacity() + overflow.max(BUFFER_CHUNK_SIZE);
            self.buf.reserve_exact(target - self.buf.len());
        }
    }

    fn put_u8(&mut self, v: u8) {
        self.ensure(1);
        self.buf.put_u8(v);
    }

    fn put_i16(&mut self, v: i16) {
        self.ensure(2);
        self.buf.put_i16(v);
    }

    fn put_i32(&mut self, v: i32) {
        self.ensure(4);
        self.buf.put_i32(v);
    }

    fn put_i64(&mut self, v: i64) {
        self.ensure(8);
        self.buf.put_i64(v);
    }

    fn put_f32(&mut self, v: f32) {
        self.ensure(4);
        self.buf.put_f32(v);
    }

    fn put_f64(&mut self, v: f64) {
        self.ensure(8);
        self.buf.put_f64(v);
    }

    fn put_slice(&mut self, v: &[u8]) {
        self.ensure(v.len());
        self.buf.put_slice(v);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Finish and hand out the encoded bytes
    pub fn freeze(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl Default for GrowableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one element (of any type) to bytes
pub fn encode(element: &ZeroElement) -> Result<Bytes, ZeroError> {
    let mut out = GrowableBuffer::new();
    write_element(&mut out, element)?;
    Ok(out.freeze())
}

/// Encode a map as a complete message
pub fn encode_map(map: &ZeroMap) -> Result<Bytes, ZeroError> {
    let mut out = GrowableBuffer::new();
    write_map(&mut out, map)?;
    Ok(out.freeze())
}

/// Encode an array as a complete message
pub fn encode_array(array: &ZeroArray) -> Result<Bytes, ZeroError> {
    let mut out = GrowableBuffer::new();
    write_array(&mut out, array)?;
    Ok(out.freeze())
}

fn short_len(len: usize) -> Result<i16, ZeroError> {
    if len > MAX_SHORT_LEN {
        return Err(ZeroError::Oversized(len));
    }
    Ok(len as i16)
}

fn write_str(out: &mut GrowableBuffer, value: &str) -> Result<(), ZeroError> {
    out.put_i16(short_len(value.len())?);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn write_map(out: &mut GrowableBuffer, map: &ZeroMap) -> Result<(), ZeroError> {
    out.put_u8(ZeroType::ZeroMap as u8);
    write_map_body(out, map)
}

fn write_map_body(out: &mut GrowableBuffer, map: &ZeroMap) -> Result<(), ZeroError> {
    out.put_i16(short_len(map.len())?);
    for (key, value) in map.iter() {
        write_str(out, key)?;
        write_element(out, value)?;
    }
    Ok(())
}

fn write_array(out: &mut GrowableBuffer, array: &ZeroArray) -> Result<(), ZeroError> {
    out.put_u8(ZeroType::ZeroArray as u8);
    write_array_body(out, array)
}

fn write_array_body(out: &mut GrowableBuffer, array: &ZeroArray) -> Result<(), ZeroError> {
    out.put_i16(short_len(array.len())?);
    for value in array.iter() {
        write_element(out, value)?;
    }
    Ok(())
}

fn write_element(out: &mut GrowableBuffer, element: &ZeroElement) -> Result<(), ZeroError> {
    out.put_u8(element.zero_type() as u8);
    match element {
        ZeroElement::Null => {}
        ZeroElement::Bool(v) => out.put_u8(u8::from(*v)),
        ZeroElement::Byte(v) => out.put_u8(*v),
        ZeroElement::Short(v) => out.put_i16(*v),
        ZeroElement::Int(v) => out.put_i32(*v),
        ZeroElement::Long(v) => out.put_i64(*v),
        ZeroElement::Float(v) => out.put_f32(*v),
        ZeroElement::Double(v) => out.put_f64(*v),
        ZeroElement::String(v) => write_str(out, v)?,
        ZeroElement::BoolArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_u8(u8::from(*v));
            }
        }
        ZeroElement::ByteArray(values) => {
            if values.len() > MAX_INT_LEN {
                return Err(ZeroError::Oversized(values.len()));
            }
            out.put_i32(values.len() as i32);
            out.put_slice(values);
        }
        ZeroElement::ShortArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_i16(*v);
            }
        }
        ZeroElement::IntArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_i32(*v);
            }
        }
        ZeroElement::LongArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_i64(*v);
            }
        }
        ZeroElement::FloatArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_f32(*v);
            }
        }
        ZeroElement::DoubleArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                out.put_f64(*v);
            }
        }
        ZeroElement::StringArray(values) => {
            out.put_i16(short_len(values.len())?);
            for v in values {
                write_str(out, v)?;
            }
        }
        ZeroElement::Array(array) => write_array_body(out, array)?,
        ZeroElement::Map(map) => write_map_body(out, map)?,
    }
    Ok(())
}

/// Cursor-based decoder over a borrowed buffer
#[derive(Debug)]
pub struct ZeroDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> ZeroDecoder<'a> {
    /// Start decoding at the beginning of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, depth: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<(), ZeroError> {
        if self.remaining() < n {
            return Err(ZeroError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ZeroError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ZeroError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8, ZeroError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn get_bool(&mut self) -> Result<bool, ZeroError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ZeroError::InvalidBoolean(other)),
        }
    }

    fn get_i16(&mut self) -> Result<i16, ZeroError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    fn get_i32(&mut self) -> Result<i32, ZeroError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn get_i64(&mut self) -> Result<i64, ZeroError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn get_f32(&mut self) -> Result<f32, ZeroError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    fn get_f64(&mut self) -> Result<f64, ZeroError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a 2-byte count and check that `count * min_item` bytes remain
    fn get_count(&mut self, min_item: usize) -> Result<usize, ZeroError> {
        let raw = self.get_i16()?;
        self.check_len(raw as i32, min_item)
    }

    fn check_len(&self, raw: i32, min_item: usize) -> Result<usize, ZeroError> {
        if raw < 0 {
            return Err(ZeroError::NegativeLength(raw));
        }
        let count = raw as usize;
        let declared = count.saturating_mul(min_item);
        if declared > self.remaining() {
            return Err(ZeroError::LengthOverflow {
                declared,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    fn get_string(&mut self) -> Result<String, ZeroError> {
        let len = self.get_count(1)?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ZeroError::InvalidUtf8)
    }

    /// Decode the next element
    pub fn read_element(&mut self) -> Result<ZeroElement, ZeroError> {
        let tag = ZeroType::try_from(self.get_u8()?)?;
        self.read_body(tag)
    }

    /// Decode the next element, requiring a map
    pub fn read_map(&mut self) -> Result<ZeroMap, ZeroError> {
        self.expect_tag(ZeroType::ZeroMap)?;
        self.read_map_body()
    }

    /// Decode the next element, requiring an array
    pub fn read_array(&mut self) -> Result<ZeroArray, ZeroError> {
        self.expect_tag(ZeroType::ZeroArray)?;
        self.read_array_body()
    }

    fn expect_tag(&mut self, expected: ZeroType) -> Result<(), ZeroError> {
        let found = self.get_u8()?;
        if found != expected as u8 {
            return Err(ZeroError::UnexpectedType {
                expected: expected as u8,
                found,
            });
        }
        Ok(())
    }

    fn enter(&mut self) -> Result<(), ZeroError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ZeroError::DepthExceeded(self.depth));
        }
        Ok(())
    }

    fn read_map_body(&mut self) -> Result<ZeroMap, ZeroError> {
        self.enter()?;
        // Each entry needs at least a key length and a tag.
        let count = self.get_count(3)?;
        let mut map = ZeroMap::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for _ in 0..count {
            let key = self.get_string()?;
            let value = self.read_element()?;
            if !seen.insert(key.clone()) {
                return Err(ZeroError::DuplicateKey(key));
            }
            map.push_unique(key, value);
        }
        self.depth -= 1;
        Ok(map)
    }

    fn read_array_body(&mut self) -> Result<ZeroArray, ZeroError> {
        self.enter()?;
        let count = self.get_count(1)?;
        let mut array = ZeroArray::with_capacity(count);
        for _ in 0..count {
            array.push(self.read_element()?);
        }
        self.depth -= 1;
        Ok(array)
    }

    fn read_body(&mut self, tag: ZeroType) -> Result<ZeroElement, ZeroError> {
        let element = match tag {
            ZeroType::Null => ZeroElement::Null,
            ZeroType::Boolean => ZeroElement::Bool(self.get_bool()?),
            ZeroType::Byte => ZeroElement::Byte(self.get_u8()?),
            ZeroType::Short => ZeroElement::Short(self.get_i16()?),
            ZeroType::Integer => ZeroElement::Int(self.get_i32()?),
            ZeroType::Long => ZeroElement::Long(self.get_i64()?),
            ZeroType::Float => ZeroElement::Float(self.get_f32()?),
            ZeroType::Double => ZeroElement::Double(self.get_f64()?),
            ZeroType::String => ZeroElement::String(self.get_string()?),
            ZeroType::BooleanArray => {
                let count = self.get_count(1)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_bool()?);
                }
                ZeroElement::BoolArray(values)
            }
            ZeroType::ByteArray => {
                let raw = self.get_i32()?;
                let len = self.check_len(raw, 1)?;
                ZeroElement::ByteArray(self.take(len)?.to_vec())
            }
            ZeroType::ShortArray => {
                let count = self.get_count(2)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_i16()?);
                }
                ZeroElement::ShortArray(values)
            }
            ZeroType::IntegerArray => {
                let count = self.get_count(4)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_i32()?);
                }
                ZeroElement::IntArray(values)
            }
            ZeroType::LongArray => {
                let count = self.get_count(8)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_i64()?);
                }
                ZeroElement::LongArray(values)
            }
            ZeroType::FloatArray => {
                let count = self.get_count(4)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_f32()?);
                }
                ZeroElement::FloatArray(values)
            }
            ZeroType::DoubleArray => {
                let count = self.get_count(8)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_f64()?);
                }
                ZeroElement::DoubleArray(values)
            }
            ZeroType::StringArray => {
                let count = self.get_count(2)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_string()?);
                }
                ZeroElement::StringArray(values)
            }
            ZeroType::ZeroArray => ZeroElement::Array(self.read_array_body()?),
            ZeroType::ZeroMap => ZeroElement::Map(self.read_map_body()?),
        };
        Ok(element)
    }

    fn finish(self) -> Result<(), ZeroError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ZeroError::TrailingBytes(n)),
        }
    }
}

/// Decode one element from the front of `buf`, returning it and the bytes consumed
pub fn decode_element(buf: &[u8]) -> Result<(ZeroElement, usize), ZeroError> {
    let mut decoder = ZeroDecoder::new(buf);
    let element = decoder.read_element()?;
    Ok((element, decoder.position()))
}

/// Decode a buffer holding exactly one element
pub fn decode(buf: &[u8]) -> Result<ZeroElement, ZeroError> {
    let mut decoder = ZeroDecoder::new(buf);
    let element = decoder.read_element()?;
    decoder.finish()?;
    Ok(element)
}

/// Decode a complete message: exactly one top-level map or array
pub fn decode_message(buf: &[u8]) -> Result<ZeroElement, ZeroError> {
    if buf.len() < MIN_MESSAGE_SIZE {
        return Err(ZeroError::TooShort(buf.len()));
    }
    let tag = buf[0];
    if tag != ZeroType::ZeroMap as u8 && tag != ZeroType::ZeroArray as u8 {
        ZeroType::try_from(tag)?;
        return Err(ZeroError::NotMessage(tag));
    }
    decode(buf)
}

/// Decode a buffer holding exactly one map
pub fn decode_map(buf: &[u8]) -> Result<ZeroMap, ZeroError> {
    if buf.len() < MIN_MESSAGE_SIZE {
        return Err(ZeroError::TooShort(buf.len()));
    }
    let mut decoder = ZeroDecoder::new(buf);
    let map = decoder.read_map()?;
    decoder.finish()?;
    Ok(map)
}

/// Decode a buffer holding exactly one array
pub fn decode_array(buf: &[u8]) -> Result<ZeroArray, ZeroError> {
    if buf.len() < MIN_MESSAGE_SIZE {
        return Err(ZeroError::TooShort(buf.len()));
    }
    let mut decoder = ZeroDecoder::new(buf);
    let array = decoder.read_array()?;
    decoder.finish()?;
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(element: ZeroElement) {
        let bytes = encode(&element).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, element);
    }

    #[test]
    fn test_scalar_roundtrip() {
        roundtrip(ZeroElement::Null);
        roundtrip(ZeroElement::Bool(true));
        roundtrip(ZeroElement::Bool(false));
        roundtrip(ZeroElement::Byte(0xFE));
        roundtrip(ZeroElement::Short(i16::MIN));
        roundtrip(ZeroElement::Int(-42));
        roundtrip(ZeroElement::Long(i64::MAX));
        roundtrip(ZeroElement::Float(3.5));
        roundtrip(ZeroElement::Double(-0.125));
        roundtrip(ZeroElement::String(String::new()));
        roundtrip(ZeroElement::String("héllo".to_string()));
    }

    #[test]
    fn test_array_roundtrip() {
        roundtrip(ZeroElement::BoolArray(vec![true, false, true]));
        roundtrip(ZeroElement::ByteArray(vec![]));
        roundtrip(ZeroElement::ByteArray((0..=255).collect()));
        roundtrip(ZeroElement::ShortArray(vec![1, -1, i16::MAX]));
        roundtrip(ZeroElement::IntArray(vec![]));
        roundtrip(ZeroElement::LongArray(vec![i64::MIN, 0]));
        roundtrip(ZeroElement::FloatArray(vec![1.0, -2.5]));
        roundtrip(ZeroElement::DoubleArray(vec![f64::MAX]));
        roundtrip(ZeroElement::StringArray(vec!["".into(), "abc".into()]));
    }

    #[test]
    fn test_nested_roundtrip() {
        let inner = ZeroMap::new().with("hp", 100).with("name", "knight");
        let list = ZeroArray::new()
            .with(inner.clone())
            .with(ZeroElement::Null)
            .with(ZeroArray::new());
        let outer = ZeroMap::new()
            .with("players", list)
            .with("empty", ZeroMap::new())
            .with("tick", 7i64);
        roundtrip(ZeroElement::Map(outer));
    }

    #[test]
    fn test_player_map_example() {
        let map = ZeroMap::new().with("u", "player1");
        let bytes = encode_map(&map).unwrap();
        assert_eq!(
            &bytes[..],
            &[18, 0, 1, 0, 1, b'u', 8, 0, 7, b'p', b'l', b'a', b'y', b'e', b'r', b'1']
        );

        let decoded = decode_map(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get_str("u"), Some("player1"));
    }

    #[test]
    fn test_empty_int_array_consumes_header_only() {
        let bytes = encode(&ZeroElement::IntArray(vec![])).unwrap();
        let mut padded = bytes.to_vec();
        padded.extend_from_slice(&[0xAA, 0xBB]);

        let (element, consumed) = decode_element(&padded).unwrap();
        assert_eq!(element, ZeroElement::IntArray(vec![]));
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_negative_string_length() {
        // string tag, length -1
        let err = decode(&[8, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err, ZeroError::NegativeLength(-1));
    }

    #[test]
    fn test_negative_byte_array_length() {
        let err = decode(&[10, 0x80, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ZeroError::NegativeLength(i32::MIN));
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        // byte array claiming i32::MAX bytes with 2 bytes present
        let err = decode(&[10, 0x7F, 0xFF, 0xFF, 0xFF, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            ZeroError::LengthOverflow {
                declared: i32::MAX as usize,
                remaining: 2
            }
        );

        // long array claiming 32767 entries
        let err = decode(&[13, 0x7F, 0xFF, 0, 0]).unwrap_err();
        assert!(matches!(err, ZeroError::LengthOverflow { .. }));

        // map claiming 1000 entries with nothing behind it
        let err = decode(&[18, 0x03, 0xE8]).unwrap_err();
        assert!(matches!(err, ZeroError::LengthOverflow { .. }));
    }

    #[test]
    fn test_truncated_scalar() {
        let err = decode(&[4, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            ZeroError::Truncated {
                needed: 4,
                remaining: 2
            }
        );
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(decode(&[99]).unwrap_err(), ZeroError::UnknownType(99));
        assert_eq!(
            decode_message(&[99, 0, 0]).unwrap_err(),
            ZeroError::UnknownType(99)
        );
    }

    #[test]
    fn test_invalid_boolean() {
        assert_eq!(decode(&[1, 2]).unwrap_err(), ZeroError::InvalidBoolean(2));
    }

    #[test]
    fn test_mismatched_composite_tag() {
        let bytes = encode_array(&ZeroArray::new()).unwrap();
        let err = decode_map(&bytes).unwrap_err();
        assert_eq!(
            err,
            ZeroError::UnexpectedType {
                expected: 18,
                found: 17
            }
        );
    }

    #[test]
    fn test_message_rules() {
        assert_eq!(decode_message(&[18, 0]).unwrap_err(), ZeroError::TooShort(2));
        assert_eq!(
            decode_message(&[4, 0, 0, 0, 1]).unwrap_err(),
            ZeroError::NotMessage(4)
        );
        assert_eq!(
            decode_message(&[17, 0, 0, 9]).unwrap_err(),
            ZeroError::TrailingBytes(1)
        );
        assert!(decode_message(&[17, 0, 0]).is_ok());
    }

    #[test]
    fn test_duplicate_key() {
        let err = decode(&[18, 0, 2, 0, 1, b'a', 0, 0, 1, b'a', 0]).unwrap_err();
        assert_eq!(err, ZeroError::DuplicateKey("a".to_string()));
    }

    #[test]
    fn test_largest_map_decodes_quickly() {
        let count = i16::MAX as usize;
        let mut buf = vec![18];
        buf.extend_from_slice(&(count as i16).to_be_bytes());
        for i in 0..count {
            let key = format!("k{}", i);
            buf.extend_from_slice(&(key.len() as i16).to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.push(0);
        }

        let started = std::time::Instant::now();
        let map = decode_map(&buf).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(map.len(), count);
        assert_eq!(map.iter().last().map(|(k, _)| k), Some("k32766"));
        assert!(elapsed < std::time::Duration::from_secs(1), "decode took {:?}", elapsed);
    }

    #[test]
    fn test_duplicate_key_after_many_entries() {
        let mut buf = vec![18, 0x03, 0xE9];
        for i in 0..1000 {
            let key = format!("k{}", i);
            buf.extend_from_slice(&(key.len() as i16).to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(&[0, 2, b'k', b'7', 0]);
        assert_eq!(decode(&buf).unwrap_err(), ZeroError::DuplicateKey("k7".to_string()));
    }

    #[test]
    fn test_depth_limit() {
        let mut buf = Vec::new();
        for _ in 0..=MAX_DEPTH {
            buf.extend_from_slice(&[17, 0, 1]);
        }
        buf.extend_from_slice(&[17, 0, 0]);
        assert!(matches!(decode(&buf), Err(ZeroError::DepthExceeded(_))));
    }

    #[test]
    fn test_buffer_growth() {
        let mut out = GrowableBuffer::new();
        assert!(out.capacity() >= BUFFER_CHUNK_SIZE);

        out.put_slice(&[0u8; 500]);
        out.put_slice(&[0u8; 20]);
        assert!(out.capacity() >= 2 * BUFFER_CHUNK_SIZE);

        out.put_slice(&vec![0u8; 4096]);
        assert!(out.capacity() >= 4616);
        assert_eq!(out.len(), 4616);
    }

    #[test]
    fn test_oversized_string_encode() {
        let long = "x".repeat(i16::MAX as usize + 1);
        assert_eq!(
            encode(&ZeroElement::String(long)).unwrap_err(),
            ZeroError::Oversized(i16::MAX as usize + 1)
        );
    }
}
