/*!
Compact binary archive.

Every primitive is written as a one-byte kind marker followed by its
big-endian payload; strings carry a `u32` length prefix. The marker lets
the loader report a `Format` error instead of silently misreading fields.
*/

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{LoadArchive, SaveArchive};
use crate::{PersistError, Result};

const KIND_U64: u8 = 0x01;
const KIND_I64: u8 = 0x02;
const KIND_F64: u8 = 0x03;
const KIND_BOOL: u8 = 0x04;
const KIND_STR: u8 = 0x05;

fn kind_name(kind: u8) -> &'static str {
    match kind {
        KIND_U64 => "u64",
        KIND_I64 => "i64",
        KIND_F64 => "f64",
        KIND_BOOL => "bool",
        KIND_STR => "str",
        _ => "unknown",
    }
}

/// Binary archive writer backed by a growable buffer
#[derive(Debug, Default)]
pub struct BinarySaveArchive {
    buf: BytesMut,
}

impl BinarySaveArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and take the encoded bytes
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl SaveArchive for BinarySaveArchive {
    fn save_u64(&mut self, value: u64) -> Result<()> {
        self.buf.put_u8(KIND_U64);
        self.buf.put_u64(value);
        Ok(())
    }

    fn save_i64(&mut self, value: i64) -> Result<()> {
        self.buf.put_u8(KIND_I64);
        self.buf.put_i64(value);
        Ok(())
    }

    fn save_f64(&mut self, value: f64) -> Result<()> {
        self.buf.put_u8(KIND_F64);
        self.buf.put_f64(value);
        Ok(())
    }

    fn save_bool(&mut self, value: bool) -> Result<()> {
        self.buf.put_u8(KIND_BOOL);
        self.buf.put_u8(u8::from(value));
        Ok(())
    }

    fn save_str(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| {
            PersistError::format(format!("String of {} bytes is too long to archive", value.len()))
        })?;
        self.buf.put_u8(KIND_STR);
        self.buf.put_u32(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }
}

/// Binary archive reader over an immutable buffer
#[derive(Debug)]
pub struct BinaryLoadArchive {
    buf: Bytes,
}

impl BinaryLoadArchive {
    pub fn new<B: Into<Bytes>>(buf: B) -> Self {
        Self { buf: buf.into() }
    }

    fn expect_kind(&mut self, expected: u8) -> Result<()> {
        if !self.buf.has_remaining() {
            return Err(PersistError::format(format!(
                "Archive ended while expecting {}",
                kind_name(expected)
            )));
        }
        let kind = self.buf.get_u8();
        if kind != expected {
            return Err(PersistError::format(format!(
                "Expected {} in archive, found {}",
                kind_name(expected),
                kind_name(kind)
            )));
        }
        Ok(())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(PersistError::format(format!(
                "Truncated archive: needed {needed} bytes, {} remain",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

impl LoadArchive for BinaryLoadArchive {
    fn load_u64(&mut self) -> Result<u64> {
        self.expect_kind(KIND_U64)?;
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    fn load_i64(&mut self) -> Result<i64> {
        self.expect_kind(KIND_I64)?;
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    fn load_f64(&mut self) -> Result<f64> {
        self.expect_kind(KIND_F64)?;
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    fn load_bool(&mut self) -> Result<bool> {
        self.expect_kind(KIND_BOOL)?;
        self.ensure(1)?;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(PersistError::format(format!("Invalid bool byte {other:#04x}"))),
        }
    }

    fn load_string(&mut self) -> Result<String> {
        self.expect_kind(KIND_STR)?;
        self.ensure(4)?;
        let len = self.buf.get_u32() as usize;
        self.ensure(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| PersistError::format(format!("Invalid UTF-8 in archived string: {e}")))
    }

    fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }
}
