//! Binary payload format.
//!
//! A subset of the structured-clone wire format produced by the executor's
//! value serializer: a `0xFF <version>` header followed by one tagged value.
//! Objects and arrays are numbered in the order they begin so later
//! `^ <id>` tags can refer back to them.
//!
//! Every decoded value counts against a node budget proportional to the
//! input length. A back-reference costs the size of the subtree it copies,
//! so nested references cannot expand a small buffer exponentially.

use std::sync::Arc;

use indexmap::IndexMap;

use super::CodecError;
use super::string_table::StringTable;
use crate::value::Value;

/// Version written by the encoder.
pub const LATEST_VERSION: u32 = 13;
/// Newest version the reader understands.
pub const MAX_SUPPORTED_VERSION: u32 = 15;

const MAX_DEPTH: usize = 256;
const MAX_SPARSE_LENGTH: u32 = 1 << 16;
/// Strings up to this many bytes go through the string table.
const MAX_INTERNALIZED_LEN: usize = 64;
const NODES_PER_BYTE: usize = 16;
const MIN_NODE_BUDGET: usize = 4096;

mod tag {
    pub const VERSION: u8 = 0xFF;
    pub const PADDING: u8 = 0x00;
    pub const VERIFY_OBJECT_COUNT: u8 = b'?';
    pub const THE_HOLE: u8 = b'-';
    pub const UNDEFINED: u8 = b'_';
    pub const NULL: u8 = b'0';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const INT32: u8 = b'I';
    pub const UINT32: u8 = b'U';
    pub const DOUBLE: u8 = b'N';
    pub const UTF8_STRING: u8 = b'S';
    pub const ONE_BYTE_STRING: u8 = b'"';
    pub const TWO_BYTE_STRING: u8 = b'c';
    pub const OBJECT_REFERENCE: u8 = b'^';
    pub const BEGIN_OBJECT: u8 = b'o';
    pub const END_OBJECT: u8 = b'{';
    pub const BEGIN_SPARSE_ARRAY: u8 = b'a';
    pub const END_SPARSE_ARRAY: u8 = b'@';
    pub const BEGIN_DENSE_ARRAY: u8 = b'A';
    pub const END_DENSE_ARRAY: u8 = b'$';
    pub const DATE: u8 = b'D';
    pub const TRUE_OBJECT: u8 = b'y';
    pub const FALSE_OBJECT: u8 = b'x';
    pub const NUMBER_OBJECT: u8 = b'n';
    pub const STRING_OBJECT: u8 = b's';
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::MalformedPayload {
        reason: reason.into(),
    }
}

/// Decode one value. The top-level shape is not checked here.
pub fn decode(bytes: &[u8], strings: &StringTable) -> Result<Value, CodecError> {
    let mut reader = Reader {
        buf: bytes,
        pos: 0,
        strings,
        objects: Vec::new(),
        nodes: 0,
        budget: bytes.len().saturating_mul(NODES_PER_BYTE).max(MIN_NODE_BUDGET),
    };
    let version = reader.read_header()?;
    tracing::trace!(version, len = bytes.len(), "Decoding binary payload");
    reader.read_value(0)
}

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer {
        out: Vec::with_capacity(64),
    };
    writer.out.push(tag::VERSION);
    writer.write_varint(LATEST_VERSION);
    writer.write_value(value, 0)?;
    Ok(writer.out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    strings: &'a StringTable,
    /// `None` while an object is still being read (a reference to it is a
    /// cycle). Finished objects keep their subtree node count.
    objects: Vec<Option<(Value, usize)>>,
    nodes: usize,
    budget: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| malformed("unexpected end of buffer"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| malformed(format!("length {len} reads past end of buffer")))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_varint(&mut self) -> Result<u32, CodecError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            if shift > 28 {
                return Err(malformed("varint too long"));
            }
            let b = self.read_u8()?;
            result |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        u32::try_from(result).map_err(|_| malformed("varint overflows u32"))
    }

    fn read_zigzag(&mut self) -> Result<i32, CodecError> {
        let v = self.read_varint()?;
        Ok(((v >> 1) as i32) ^ -((v & 1) as i32))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_header(&mut self) -> Result<u32, CodecError> {
        if self.read_u8().ok() != Some(tag::VERSION) {
            return Err(malformed("missing version header"));
        }
        let version = self.read_varint()?;
        if version == 0 || version > MAX_SUPPORTED_VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }
        Ok(version)
    }

    /// Skip padding and object-count hints, then return the next tag unconsumed.
    fn peek_tag(&mut self) -> Result<u8, CodecError> {
        loop {
            let b = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| malformed("unexpected end of buffer"))?;
            match b {
                tag::PADDING => self.pos += 1,
                tag::VERIFY_OBJECT_COUNT => {
                    self.pos += 1;
                    self.read_varint()?;
                }
                _ => return Ok(b),
            }
        }
    }

    fn read_tag(&mut self) -> Result<u8, CodecError> {
        let t = self.peek_tag()?;
        self.pos += 1;
        Ok(t)
    }

    fn charge(&mut self, nodes: usize) -> Result<(), CodecError> {
        self.nodes = self.nodes.saturating_add(nodes);
        if self.nodes > self.budget {
            return Err(malformed(format!(
                "payload expands past the node budget of {}",
                self.budget
            )));
        }
        Ok(())
    }

    /// Returns the object id and the node count before its own tag.
    fn begin_object(&mut self) -> (usize, usize) {
        self.objects.push(None);
        (self.objects.len() - 1, self.nodes.saturating_sub(1))
    }

    fn finish_object(&mut self, (id, start): (usize, usize), value: Value) -> Value {
        self.objects[id] = Some((value.clone(), self.nodes - start));
        value
    }

    fn read_reference(&mut self) -> Result<Value, CodecError> {
        let id = self.read_varint()? as usize;
        let size = match self.objects.get(id) {
            Some(Some((_, size))) => *size,
            Some(None) => return Err(malformed(format!("cyclic reference to object {id}"))),
            None => return Err(malformed(format!("unknown object id {id}"))),
        };
        self.charge(size)?;
        self.objects
            .get(id)
            .and_then(Option::as_ref)
            .map(|(value, _)| value.clone())
            .ok_or_else(|| malformed(format!("unknown object id {id}")))
    }

    fn intern(&self, s: &str) -> Arc<str> {
        if s.len() <= MAX_INTERNALIZED_LEN {
            self.strings.internalize(s)
        } else {
            Arc::from(s)
        }
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        self.charge(1)?;

        match self.read_tag()? {
            tag::UNDEFINED | tag::NULL | tag::THE_HOLE => Ok(Value::Null),
            tag::TRUE => Ok(Value::Bool(true)),
            tag::FALSE => Ok(Value::Bool(false)),
            tag::INT32 => Ok(Value::Number(f64::from(self.read_zigzag()?))),
            tag::UINT32 => Ok(Value::Number(f64::from(self.read_varint()?))),
            tag::DOUBLE => Ok(Value::Number(self.read_f64()?)),
            t @ (tag::UTF8_STRING | tag::ONE_BYTE_STRING | tag::TWO_BYTE_STRING) => {
                self.read_string(t).map(Value::String)
            }
            tag::OBJECT_REFERENCE => self.read_reference(),
            tag::BEGIN_OBJECT => self.read_object(depth),
            tag::BEGIN_DENSE_ARRAY => self.read_dense_array(depth),
            tag::BEGIN_SPARSE_ARRAY => self.read_sparse_array(depth),
            tag::DATE | tag::NUMBER_OBJECT => {
                let slot = self.begin_object();
                let n = self.read_f64()?;
                Ok(self.finish_object(slot, Value::Number(n)))
            }
            t @ (tag::TRUE_OBJECT | tag::FALSE_OBJECT) => {
                let slot = self.begin_object();
                Ok(self.finish_object(slot, Value::Bool(t == tag::TRUE_OBJECT)))
            }
            tag::STRING_OBJECT => {
                let slot = self.begin_object();
                let t = self.read_tag()?;
                let s = self.read_string(t)?;
                Ok(self.finish_object(slot, Value::String(s)))
            }
            other => Err(malformed(format!("unknown tag 0x{other:02x}"))),
        }
    }

    fn read_string(&mut self, t: u8) -> Result<Arc<str>, CodecError> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len)?;
        match t {
            tag::UTF8_STRING => {
                let s = std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
                Ok(self.intern(s))
            }
            tag::ONE_BYTE_STRING => {
                let s: String = bytes.iter().map(|&b| char::from(b)).collect();
                Ok(self.intern(&s))
            }
            tag::TWO_BYTE_STRING => {
                if len % 2 != 0 {
                    return Err(malformed("odd two-byte string length"));
                }
                let s = super::text::decode_utf16(bytes, super::text::ByteOrder::Little);
                Ok(self.intern(&s))
            }
            other => Err(malformed(format!("expected string, found tag 0x{other:02x}"))),
        }
    }

    fn read_key(&mut self, depth: usize) -> Result<Arc<str>, CodecError> {
        match self.read_value(depth + 1)? {
            Value::String(s) => Ok(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Ok(self.intern(&(n as i64).to_string()))
            }
            Value::Number(n) => Ok(self.intern(&n.to_string())),
            _ => Err(malformed("invalid property key")),
        }
    }

    fn read_object(&mut self, depth: usize) -> Result<Value, CodecError> {
        let slot = self.begin_object();
        let mut map = IndexMap::new();
        let mut count = 0u32;
        while self.peek_tag()? != tag::END_OBJECT {
            let key = self.read_key(depth)?;
            let value = self.read_value(depth + 1)?;
            map.insert(key, value);
            count += 1;
        }
        self.pos += 1;

        let declared = self.read_varint()?;
        if declared != count {
            return Err(malformed(format!(
                "object declares {declared} properties, read {count}"
            )));
        }
        Ok(self.finish_object(slot, Value::Map(map)))
    }

    /// Consume `key value` pairs up to `end`, returning how many were read.
    fn skip_properties(&mut self, end: u8, depth: usize) -> Result<u32, CodecError> {
        let mut count = 0u32;
        while self.peek_tag()? != end {
            self.read_key(depth)?;
            self.read_value(depth + 1)?;
            count += 1;
        }
        self.pos += 1;
        Ok(count)
    }

    fn check_trailer(&mut self, props: u32, len: u32) -> Result<(), CodecError> {
        let declared_props = self.read_varint()?;
        let declared_len = self.read_varint()?;
        if declared_props != props || declared_len != len {
            return Err(malformed("array trailer does not match contents"));
        }
        Ok(())
    }

    fn read_dense_array(&mut self, depth: usize) -> Result<Value, CodecError> {
        let slot = self.begin_object();
        let len = self.read_varint()?;
        // every element takes at least one byte
        if len as usize > self.remaining() {
            return Err(malformed(format!("array length {len} exceeds buffer")));
        }

        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        let props = self.skip_properties(tag::END_DENSE_ARRAY, depth)?;
        self.check_trailer(props, len)?;
        Ok(self.finish_object(slot, Value::Array(items)))
    }

    fn read_sparse_array(&mut self, depth: usize) -> Result<Value, CodecError> {
        let slot = self.begin_object();
        let len = self.read_varint()?;
        if len > MAX_SPARSE_LENGTH {
            return Err(malformed(format!("sparse array length {len} too large")));
        }
        // holes are materialized
        self.charge(len as usize)?;

        let mut items = vec![Value::Null; len as usize];
        let mut props = 0u32;
        while self.peek_tag()? != tag::END_SPARSE_ARRAY {
            let key = self.read_value(depth + 1)?;
            let value = self.read_value(depth + 1)?;
            props += 1;
            if let Value::Number(n) = key
                && n >= 0.0
                && n.fract() == 0.0
                && (n as usize) < items.len()
            {
                items[n as usize] = value;
            }
        }
        self.pos += 1;
        self.check_trailer(props, len)?;
        Ok(self.finish_object(slot, Value::Array(items)))
    }
}

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn write_varint(&mut self, mut v: u32) {
        while v >= 0x80 {
            self.out.push((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        self.out.push(v as u8);
    }

    fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u32::try_from(len).map_err(|_| CodecError::Unencodable {
            reason: format!("length {len} exceeds u32"),
        })?;
        self.write_varint(len);
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        if s.chars().all(|c| u32::from(c) <= 0xFF) {
            self.out.push(tag::ONE_BYTE_STRING);
            self.write_len(s.chars().count())?;
            self.out.extend(s.chars().map(|c| u32::from(c) as u8));
        } else {
            let bytes = super::text::encode_utf16le(s);
            self.out.push(tag::TWO_BYTE_STRING);
            self.write_len(bytes.len())?;
            self.out.extend_from_slice(&bytes);
        }
        Ok(())
    }

    fn write_number(&mut self, n: f64) {
        let is_int32 = n.fract() == 0.0
            && n >= f64::from(i32::MIN)
            && n <= f64::from(i32::MAX)
            && !(n == 0.0 && n.is_sign_negative());
        if is_int32 {
            let i = n as i32;
            self.out.push(tag::INT32);
            self.write_varint(((i << 1) ^ (i >> 31)) as u32);
        } else {
            self.out.push(tag::DOUBLE);
            self.out.extend_from_slice(&n.to_le_bytes());
        }
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::Unencodable {
                reason: "nesting too deep".to_string(),
            });
        }

        match value {
            Value::Null => self.out.push(tag::NULL),
            Value::Bool(true) => self.out.push(tag::TRUE),
            Value::Bool(false) => self.out.push(tag::FALSE),
            Value::Number(n) => self.write_number(*n),
            Value::String(s) => self.write_string(s)?,
            Value::Array(items) => {
                self.out.push(tag::BEGIN_DENSE_ARRAY);
                self.write_len(items.len())?;
                for item in items {
                    self.write_value(item, depth + 1)?;
                }
                self.out.push(tag::END_DENSE_ARRAY);
                self.write_varint(0);
                self.write_len(items.len())?;
            }
            Value::Map(map) => {
                self.out.push(tag::BEGIN_OBJECT);
                for (k, v) in map {
                    self.write_string(k)?;
                    self.write_value(v, depth + 1)?;
                }
                self.out.push(tag::END_OBJECT);
                self.write_len(map.len())?;
            }
        }
        Ok(())
    }
}
