//! Value codec and whole-snapshot serializers.
//!
//! Scalars are written big-endian at fixed width. Strings carry a u16 length
//! prefix; anything longer than [`CHUNK_MAX_SIZE`] bytes is split into
//! chunks announced by the [`CHUNKS_IN_USE`] sentinel.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};

use crate::constants::{
    CHUNKS_IN_USE, CHUNK_MAX_SIZE, CHUNK_SLICE_SIZE, FILE_FORMAT_VERSION, FILE_MAGIC,
};
use crate::error::{Error, Result};
use crate::value::{Entries, TypeTag, Value};

/// Type tag of a value
pub fn type_of(value: &Value) -> TypeTag {
    value.type_tag()
}

/// Encode a value into its byte form
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    put_value(&mut out, value);
    out
}

/// Decode a value of the given type tag
pub fn decode(tag: u32, bytes: &[u8]) -> Result<Value> {
    let tag = TypeTag::from_bits(tag)?;
    let mut cursor = Cursor::new(bytes);
    read_value(&mut cursor, tag)
}

fn put_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::StringSet(set) => {
            out.extend_from_slice(&(set.len() as u32).to_be_bytes());
            for item in set {
                put_string(out, item);
            }
        }
        Value::String(s) => put_string(out, s),
    }
}

pub(crate) fn read_value<R: Read>(r: &mut R, tag: TypeTag) -> Result<Value> {
    let value = match tag {
        TypeTag::Bool => Value::Bool(r.read_u8()? != 0),
        TypeTag::Float => Value::Float(r.read_f32::<BigEndian>()?),
        TypeTag::Int => Value::Int(r.read_i32::<BigEndian>()?),
        TypeTag::Long => Value::Long(r.read_i64::<BigEndian>()?),
        TypeTag::StringSet => {
            let len = r.read_u32::<BigEndian>()?;
            let mut set = BTreeSet::new();
            for _ in 0..len {
                set.insert(read_string(r)?);
            }
            Value::StringSet(set)
        }
        TypeTag::String => Value::String(read_string(r)?),
    };
    Ok(value)
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    // A literal sentinel goes through the chunked form so it decodes back to itself.
    if s.len() > CHUNK_MAX_SIZE || s == CHUNKS_IN_USE {
        let chunks = split(s, CHUNK_SLICE_SIZE);
        put_short(out, CHUNKS_IN_USE);
        out.extend_from_slice(&(chunks.len() as u32).to_be_bytes());
        for chunk in chunks {
            put_short(out, chunk);
        }
    } else {
        put_short(out, s);
    }
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let head = read_short(r)?;
    if head != CHUNKS_IN_USE {
        return Ok(head);
    }

    let chunks = r.read_u32::<BigEndian>()? as usize;
    let mut result = String::with_capacity(chunks.saturating_mul(CHUNK_SLICE_SIZE).min(1 << 24));
    for _ in 0..chunks {
        result.push_str(&read_short(r)?);
    }
    Ok(result)
}

fn put_short(out: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() <= CHUNK_MAX_SIZE);
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_short<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::corrupted(format!("invalid UTF-8 string: {}", e)))
}

/// Split text into slices of at most `slice` bytes without breaking a char
pub(crate) fn split(text: &str, slice: usize) -> Vec<&str> {
    let mut parts = Vec::with_capacity(text.len() / slice + 1);
    let mut rest = text;

    while !rest.is_empty() {
        let mut end = rest.len().min(slice);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        parts.push(head);
        rest = tail;
    }

    parts
}

/// Whole-snapshot format used by the file backend
pub trait Serializer: Send + Sync {
    /// Serialize the entries. Zero bytes means there is nothing to persist.
    fn serialize(&self, data: &Entries) -> Result<Vec<u8>>;

    /// Rebuild entries from persisted bytes. Empty input yields an empty map.
    fn deserialize(&self, data: &[u8]) -> Result<Entries>;
}

/// Default tagged binary format
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn serialize(&self, data: &Entries) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(16 + data.len() * 16);
        out.write_all(FILE_MAGIC)?;
        out.write_u8(FILE_FORMAT_VERSION)?;
        out.write_u32::<BigEndian>(data.len() as u32)?;

        for (key, value) in data {
            out.write_u32::<BigEndian>(key.len() as u32)?;
            out.write_all(key.as_bytes())?;
            out.write_u32::<BigEndian>(type_of(value).bits())?;

            let bytes = encode(value);
            out.write_u32::<BigEndian>(bytes.len() as u32)?;
            out.write_all(&bytes)?;
        }

        Ok(out)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Entries> {
        let mut entries = Entries::new();
        if data.is_empty() {
            return Ok(entries);
        }

        let mut r = Cursor::new(data);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != FILE_MAGIC {
            return Err(Error::corrupted("bad magic"));
        }
        let version = r.read_u8()?;
        if version != FILE_FORMAT_VERSION {
            return Err(Error::corrupted(format!("unknown format version {}", version)));
        }

        let count = r.read_u32::<BigEndian>()?;
        for _ in 0..count {
            let key_len = r.read_u32::<BigEndian>()? as usize;
            let start = r.position() as usize;
            let key = data
                .get(start..start.saturating_add(key_len))
                .ok_or_else(|| Error::corrupted("key truncated"))?;
            r.set_position((start + key_len) as u64);
            let key = std::str::from_utf8(key)
                .map_err(|_| Error::corrupted("key is not UTF-8"))?
                .to_owned();

            let tag = r.read_u32::<BigEndian>()?;
            let len = r.read_u32::<BigEndian>()? as usize;
            let start = r.position() as usize;
            let bytes = data
                .get(start..start.saturating_add(len))
                .ok_or_else(|| Error::corrupted(format!("value of {:?} truncated", key)))?;
            r.set_position((start + len) as u64);

            entries.insert(key, decode(tag, bytes)?);
        }

        Ok(entries)
    }
}
