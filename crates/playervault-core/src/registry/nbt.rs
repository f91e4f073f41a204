//! NBT (Named Binary Tag) reader and writer.
//!
//! NBT is the big-endian binary format the game uses for player records.
//! A document is a single named root tag, almost always a Compound.
//!
//! Tag IDs:
//! ```text
//! 0x00 - End        (terminates a Compound)
//! 0x01 - Byte       (i8)
//! 0x02 - Short      (i16)
//! 0x03 - Int        (i32)
//! 0x04 - Long       (i64)
//! 0x05 - Float      (f32)
//! 0x06 - Double     (f64)
//! 0x07 - ByteArray  (i32 length + bytes)
//! 0x08 - String     (u16 length + modified UTF-8)
//! 0x09 - List       (element tag id + i32 length + payloads)
//! 0x0A - Compound   (named tags until End)
//! 0x0B - IntArray   (i32 length + i32s)
//! 0x0C - LongArray  (i32 length + i64s)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::record::DecodeError;

const TAG_END: u8 = 0x00;
const TAG_BYTE: u8 = 0x01;
const TAG_SHORT: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_LONG: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_DOUBLE: u8 = 0x06;
const TAG_BYTE_ARRAY: u8 = 0x07;
const TAG_STRING: u8 = 0x08;
const TAG_LIST: u8 = 0x09;
const TAG_COMPOUND: u8 = 0x0A;
const TAG_INT_ARRAY: u8 = 0x0B;
const TAG_LONG_ARRAY: u8 = 0x0C;

/// Maximum nesting depth for compounds/lists (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 512;

/// A decoded NBT value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    List(Vec<Tag>),
    Compound(HashMap<String, Tag>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    fn id(&self) -> u8 {
        match self {
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    /// Human-readable tag type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Tag::Byte(_) => "Byte",
            Tag::Short(_) => "Short",
            Tag::Int(_) => "Int",
            Tag::Long(_) => "Long",
            Tag::Float(_) => "Float",
            Tag::Double(_) => "Double",
            Tag::ByteArray(_) => "ByteArray",
            Tag::String(_) => "String",
            Tag::List(_) => "List",
            Tag::Compound(_) => "Compound",
            Tag::IntArray(_) => "IntArray",
            Tag::LongArray(_) => "LongArray",
        }
    }

    pub fn as_compound(&self) -> Option<&HashMap<String, Tag>> {
        match self {
            Tag::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Decode a complete NBT document, returning the root name and tag.
///
/// Trailing bytes after the root tag are ignored.
pub fn decode_root(mut buf: Bytes) -> Result<(String, Tag), DecodeError> {
    let mut decoder = NbtDecoder::new();
    let id = decoder.read_u8(&mut buf)?;
    if id == TAG_END {
        return Err(DecodeError::Malformed("document has no root tag".into()));
    }
    let name = decoder.read_string(&mut buf)?;
    let tag = decoder.decode_payload(id, &mut buf)?;
    Ok((name, tag))
}

/// Encode a named root tag as an uncompressed NBT document.
pub fn encode_root(name: &str, tag: &Tag) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(tag.id());
    write_string(name, &mut buf);
    write_payload(tag, &mut buf);
    buf.freeze()
}

struct NbtDecoder {
    depth: usize,
}

impl NbtDecoder {
    fn new() -> Self {
        Self { depth: 0 }
    }

    fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
        if buf.remaining() < n {
            Err(DecodeError::UnexpectedEof)
        } else {
            Ok(())
        }
    }

    fn read_u8(&self, buf: &mut Bytes) -> Result<u8, DecodeError> {
        Self::need(buf, 1)?;
        Ok(buf.get_u8())
    }

    fn read_len(&self, buf: &mut Bytes, elem_size: usize) -> Result<usize, DecodeError> {
        Self::need(buf, 4)?;
        let len = buf.get_i32();
        if len < 0 {
            return Err(DecodeError::Malformed(format!("negative length {}", len)));
        }
        let len = len as usize;
        // Reject lengths the input cannot possibly hold before allocating.
        if len.saturating_mul(elem_size) > buf.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(len)
    }

    fn read_string(&self, buf: &mut Bytes) -> Result<String, DecodeError> {
        Self::need(buf, 2)?;
        let len = buf.get_u16() as usize;
        Self::need(buf, len)?;
        let raw = buf.split_to(len);
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn decode_payload(&mut self, id: u8, buf: &mut Bytes) -> Result<Tag, DecodeError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::Malformed("nesting too deep".into()));
        }
        let result = self.decode_value(id, buf);
        self.depth -= 1;
        result
    }

    fn decode_value(&mut self, id: u8, buf: &mut Bytes) -> Result<Tag, DecodeError> {
        match id {
            TAG_BYTE => {
                Self::need(buf, 1)?;
                Ok(Tag::Byte(buf.get_i8()))
            }
            TAG_SHORT => {
                Self::need(buf, 2)?;
                Ok(Tag::Short(buf.get_i16()))
            }
            TAG_INT => {
                Self::need(buf, 4)?;
                Ok(Tag::Int(buf.get_i32()))
            }
            TAG_LONG => {
                Self::need(buf, 8)?;
                Ok(Tag::Long(buf.get_i64()))
            }
            TAG_FLOAT => {
                Self::need(buf, 4)?;
                Ok(Tag::Float(buf.get_f32()))
            }
            TAG_DOUBLE => {
                Self::need(buf, 8)?;
                Ok(Tag::Double(buf.get_f64()))
            }
            TAG_BYTE_ARRAY => {
                let len = self.read_len(buf, 1)?;
                Ok(Tag::ByteArray(buf.split_to(len).to_vec()))
            }
            TAG_STRING => Ok(Tag::String(self.read_string(buf)?)),
            TAG_LIST => {
                let elem_id = self.read_u8(buf)?;
                if elem_id == TAG_END {
                    // Empty lists are written with element type End.
                    Self::need(buf, 4)?;
                    buf.advance(4);
                    return Ok(Tag::List(Vec::new()));
                }
                // Every non-End payload occupies at least one byte.
                let len = self.read_len(buf, 1)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.decode_payload(elem_id, buf)?);
                }
                Ok(Tag::List(items))
            }
            TAG_COMPOUND => {
                let mut map = HashMap::new();
                loop {
                    let child_id = self.read_u8(buf)?;
                    if child_id == TAG_END {
                        break;
                    }
                    let name = self.read_string(buf)?;
                    let value = self.decode_payload(child_id, buf)?;
                    map.insert(name, value);
                }
                Ok(Tag::Compound(map))
            }
            TAG_INT_ARRAY => {
                let len = self.read_len(buf, 4)?;
                Ok(Tag::IntArray((0..len).map(|_| buf.get_i32()).collect()))
            }
            TAG_LONG_ARRAY => {
                let len = self.read_len(buf, 8)?;
                Ok(Tag::LongArray((0..len).map(|_| buf.get_i64()).collect()))
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

fn write_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16(len as u16);
    buf.put_slice(&bytes[..len]);
}

fn write_payload(tag: &Tag, buf: &mut BytesMut) {
    match tag {
        Tag::Byte(v) => buf.put_i8(*v),
        Tag::Short(v) => buf.put_i16(*v),
        Tag::Int(v) => buf.put_i32(*v),
        Tag::Long(v) => buf.put_i64(*v),
        Tag::Float(v) => buf.put_f32(*v),
        Tag::Double(v) => buf.put_f64(*v),
        Tag::ByteArray(v) => {
            buf.put_i32(v.len() as i32);
            buf.put_slice(v);
        }
        Tag::String(s) => write_string(s, buf),
        Tag::List(items) => {
            buf.put_u8(items.first().map(Tag::id).unwrap_or(TAG_END));
            buf.put_i32(items.len() as i32);
            for item in items {
                write_payload(item, buf);
            }
        }
        Tag::Compound(map) => {
            for (name, value) in map {
                buf.put_u8(value.id());
                write_string(name, buf);
                write_payload(value, buf);
            }
            buf.put_u8(TAG_END);
        }
        Tag::IntArray(v) => {
            buf.put_i32(v.len() as i32);
            v.iter().for_each(|x| buf.put_i32(*x));
        }
        Tag::LongArray(v) => {
            buf.put_i32(v.len() as i32);
            v.iter().for_each(|x| buf.put_i64(*x));
        }
    }
}
