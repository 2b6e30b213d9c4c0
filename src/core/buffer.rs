//! # Wire Buffer
//!
//! Growable byte buffer carrying every primitive of the wire format:
//! big-endian fixed-width integers and floats, single-byte booleans,
//! VarInt/VarLong, VarInt-prefixed UTF-8 strings and byte arrays, UUIDs as two
//! big-endian halves, and JSON documents carried as strings.
//!
//! Reads advance an internal cursor and fail with
//! [`ProtocolError::UnexpectedEndOfBuffer`] instead of reading past the end.
//! Range-checked writes fail with [`ProtocolError::ValueOutOfRange`] and leave
//! the buffer untouched.
//!
//! ## Prepend mode
//! Headers are usually known only after the body is serialised. Calling
//! [`WireBuffer::prepend`] makes the *next* write land at the front of the
//! buffer instead of the back:
//!
//! ```rust
//! use craftwire::core::buffer::WireBuffer;
//!
//! let mut buf = WireBuffer::new();
//! buf.write_u8(0xAA);
//! buf.prepend().write_varint(300);
//! assert_eq!(buf.as_slice(), &[0xAC, 0x02, 0xAA]);
//! ```

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::core::varint::{peek_varint, peek_varlong, put_varint, put_varlong, MAX_VARLONG_LEN};
use crate::error::{constants, ProtocolError, Result};

/// Default maximum string length in UTF-16 code units
pub const MAX_STRING_LENGTH: usize = 32767;

/// Maximum length of a JSON chat payload
pub const MAX_JSON_LENGTH: usize = 262_144;

/// Growable buffer with a read cursor and one-shot prepend mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBuffer {
    data: BytesMut,
    cursor: usize,
    prepend_next: bool,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            cursor: 0,
            prepend_next: false,
        }
    }

    /// Wrap existing bytes for reading
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self {
            data: BytesMut::from(bytes.as_ref()),
            cursor: 0,
            prepend_next: false,
        }
    }

    /// Total number of bytes held, read or not
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// The whole buffer, including bytes already read
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet read
    pub fn unread(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
        self.prepend_next = false;
    }

    /// Splice the next write at the front of the buffer
    pub fn prepend(&mut self) -> &mut Self {
        self.prepend_next = true;
        self
    }

    /// Fail a write; a pending prepend is dropped with it
    fn reject<T>(&mut self, error: ProtocolError) -> Result<T> {
        self.prepend_next = false;
        Err(error)
    }

    fn put(&mut self, bytes: &[u8]) {
        if std::mem::take(&mut self.prepend_next) {
            let mut joined = BytesMut::with_capacity(bytes.len() + self.data.len());
            joined.extend_from_slice(bytes);
            joined.extend_from_slice(&self.data);
            self.data = joined;
            if self.cursor > 0 {
                self.cursor += bytes.len();
            }
        } else {
            self.data.extend_from_slice(bytes);
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEndOfBuffer);
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.data[start..start + n])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Any nonzero byte reads as `true`
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_varint(&mut self) -> Result<i32> {
        match peek_varint(self.unread())? {
            Some((value, len)) => {
                self.cursor += len;
                Ok(value)
            }
            None => Err(ProtocolError::UnexpectedEndOfBuffer),
        }
    }

    pub fn read_varlong(&mut self) -> Result<i64> {
        match peek_varlong(self.unread())? {
            Some((value, len)) => {
                self.cursor += len;
                Ok(value)
            }
            None => Err(ProtocolError::UnexpectedEndOfBuffer),
        }
    }

    /// Read exactly `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.take(n)?))
    }

    /// Read everything after the cursor
    pub fn read_remaining(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(self.unread());
        self.cursor = self.data.len();
        rest
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_varint()?;
        usize::try_from(len)
            .map_err(|_| ProtocolError::MalformedFrame(constants::ERR_NEGATIVE_LENGTH.into()))
    }

    /// VarInt-prefixed byte array
    pub fn read_byte_array(&mut self) -> Result<Bytes> {
        let len = self.read_length()?;
        self.read_bytes(len)
    }

    /// VarInt-prefixed UTF-8 string of at most `max_chars` UTF-16 units
    pub fn read_string_bounded(&mut self, max_chars: usize) -> Result<String> {
        let len = self.read_length()?;
        if len > max_chars * 3 {
            return Err(ProtocolError::ValueOutOfRange(format!(
                "{}: {len} bytes",
                constants::ERR_STRING_TOO_LONG
            )));
        }
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::MalformedFrame(constants::ERR_INVALID_UTF8.into()))?;
        if text.encode_utf16().count() > max_chars {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "{}: {max_chars} characters",
                constants::ERR_STRING_TOO_LONG
            )));
        }
        Ok(text.to_owned())
    }

    pub fn read_string(&mut self) -> Result<String> {
        self.read_string_bounded(MAX_STRING_LENGTH)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let high = self.read_u64()? as u128;
        let low = self.read_u64()? as u128;
        Ok(Uuid::from_u128((high << 64) | low))
    }

    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let text = self.read_string_bounded(MAX_JSON_LENGTH)?;
        Ok(serde_json::from_str(&text)?)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.put(&[value]);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.put(&[value as u8]);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.put(&value.to_be_bytes());
        self
    }

    /// Write a byte given as a wide integer; accepts `[-128, 255]`
    pub fn write_byte(&mut self, value: i64) -> Result<&mut Self> {
        if !(-128..=255).contains(&value) {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "{value} does not fit in a byte"
            )));
        }
        self.put(&[value as u8]);
        Ok(self)
    }

    /// Write a short given as a wide integer; accepts `[-32768, 65535]`
    pub fn write_short(&mut self, value: i64) -> Result<&mut Self> {
        if !(-32768..=65535).contains(&value) {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "{value} does not fit in a short"
            )));
        }
        self.put(&(value as u16).to_be_bytes());
        Ok(self)
    }

    /// Write an int given as a wide integer; accepts `[i32::MIN, u32::MAX]`
    pub fn write_int(&mut self, value: i64) -> Result<&mut Self> {
        if !(i32::MIN as i64..=u32::MAX as i64).contains(&value) {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "{value} does not fit in an int"
            )));
        }
        self.put(&(value as u32).to_be_bytes());
        Ok(self)
    }

    pub fn write_varint(&mut self, value: i32) -> &mut Self {
        let mut scratch = [0u8; 5];
        let mut slice = &mut scratch[..];
        put_varint(&mut slice, value);
        let written = 5 - slice.len();
        self.put(&scratch[..written]);
        self
    }

    pub fn write_varlong(&mut self, value: i64) -> &mut Self {
        let mut scratch = [0u8; MAX_VARLONG_LEN];
        let mut slice = &mut scratch[..];
        put_varlong(&mut slice, value);
        let written = MAX_VARLONG_LEN - slice.len();
        self.put(&scratch[..written]);
        self
    }

    /// Raw bytes without a length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put(bytes);
        self
    }

    /// VarInt-prefixed byte array
    pub fn write_byte_array(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let Ok(len) = i32::try_from(bytes.len()) else {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "byte array of {} bytes",
                bytes.len()
            )));
        };
        let mut joined = Vec::with_capacity(bytes.len() + 5);
        put_varint(&mut joined, len);
        joined.extend_from_slice(bytes);
        self.put(&joined);
        Ok(self)
    }

    /// VarInt-prefixed UTF-8 string of at most `max_chars` UTF-16 units
    pub fn write_string_bounded(&mut self, value: &str, max_chars: usize) -> Result<&mut Self> {
        if value.encode_utf16().count() > max_chars {
            return self.reject(ProtocolError::ValueOutOfRange(format!(
                "{}: {max_chars} characters",
                constants::ERR_STRING_TOO_LONG
            )));
        }
        self.write_byte_array(value.as_bytes())
    }

    pub fn write_string(&mut self, value: &str) -> Result<&mut Self> {
        self.write_string_bounded(value, MAX_STRING_LENGTH)
    }

    pub fn write_uuid(&mut self, value: &Uuid) -> &mut Self {
        self.put(&value.as_u128().to_be_bytes());
        self
    }

    /// Stringify `value` and write it as a length-prefixed string
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => return self.reject(e.into()),
        };
        self.write_string_bounded(&text, MAX_JSON_LENGTH)
    }
}

impl From<Bytes> for WireBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for WireBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
