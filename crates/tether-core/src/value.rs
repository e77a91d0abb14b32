//! Typed value codec for entity payloads
//!
//! Every property, signal and call declares its value types; each type knows
//! how to write itself into a [`WireWriter`] and read itself back from a
//! [`WireReader`]. Integers are little-endian, strings are UTF-8 with a u32
//! length prefix, and records are the concatenation of their fields.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{TetherError, TetherResult};

/// Growable output buffer for payload encoding
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        WireWriter::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_str(&mut self, v: &str) {
        self.buf.put_u32_le(v.len() as u32);
        self.buf.put_slice(v.as_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over an encoded payload
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> TetherResult<()> {
        if self.buf.remaining() < n {
            return Err(TetherError::BufferTooShort {
                expected: n,
                actual: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> TetherResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> TetherResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TetherError::InvalidWireFormat(format!(
                "Invalid bool byte {other:#04x}"
            ))),
        }
    }

    pub fn read_i32(&mut self) -> TetherResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u32(&mut self) -> TetherResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i64(&mut self) -> TetherResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_u64(&mut self) -> TetherResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_string(&mut self) -> TetherResult<String> {
        let len = self.read_u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        String::from_utf8(head.to_vec())
            .map_err(|e| TetherError::InvalidWireFormat(format!("Invalid UTF-8 string: {e}")))
    }

    /// Fail unless the whole payload was consumed.
    pub fn finish(self) -> TetherResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(TetherError::InvalidWireFormat(format!(
                "{} trailing bytes after value",
                self.buf.len()
            )))
        }
    }
}

/// A value that can travel in an entity payload
pub trait WireValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn write(&self, w: &mut WireWriter);

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self>;

    /// Encode into a standalone payload
    fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        self.write(&mut w);
        w.finish()
    }

    /// Decode a standalone payload; trailing bytes are an error
    fn decode(buf: &[u8]) -> TetherResult<Self> {
        let mut r = WireReader::new(buf);
        let value = Self::read(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

impl WireValue for () {
    fn write(&self, _w: &mut WireWriter) {}

    fn read(_r: &mut WireReader<'_>) -> TetherResult<Self> {
        Ok(())
    }
}

impl WireValue for bool {
    fn write(&self, w: &mut WireWriter) {
        w.write_bool(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_bool()
    }
}

impl WireValue for u8 {
    fn write(&self, w: &mut WireWriter) {
        w.write_u8(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_u8()
    }
}

impl WireValue for i32 {
    fn write(&self, w: &mut WireWriter) {
        w.write_i32(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_i32()
    }
}

impl WireValue for u32 {
    fn write(&self, w: &mut WireWriter) {
        w.write_u32(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_u32()
    }
}

impl WireValue for i64 {
    fn write(&self, w: &mut WireWriter) {
        w.write_i64(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_i64()
    }
}

impl WireValue for u64 {
    fn write(&self, w: &mut WireWriter) {
        w.write_u64(*self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_u64()
    }
}

impl WireValue for String {
    fn write(&self, w: &mut WireWriter) {
        w.write_str(self);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        r.read_string()
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn write(&self, w: &mut WireWriter) {
        match self {
            Some(v) => {
                w.write_bool(true);
                v.write(w);
            }
            None => w.write_bool(false),
        }
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        if r.read_bool()? {
            Ok(Some(T::read(r)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.len() as u32);
        for item in self {
            item.write(w);
        }
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        let len = r.read_u32()? as usize;
        // Each element takes at least one byte unless it is zero-sized
        let mut items = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            items.push(T::read(r)?);
        }
        Ok(items)
    }
}
