// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Primitive readers and writers shared by the control and data codecs.
//!
//! All multi-byte integers on the wire are big-endian. Writers are the
//! big-endian `put_*` family of [`bytes::BufMut`]; this module adds the
//! checked readers that fail with [`DecodeError::InsufficientData`] instead
//! of panicking, the compact unsigned integer encoding, and the
//! NUL-terminated string and meta-block forms.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::compression::CompressionError;

/// Marker byte introducing a 2-byte compact integer.
pub const COMPACT_MARKER_U16: u8 = 254;
/// Marker byte introducing an 8-byte compact integer.
pub const COMPACT_MARKER_U64: u8 = 255;

/// Why a buffer failed to decode.
///
/// Any of these discards the whole message; nothing is ever delivered
/// partially decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The declared width of a field exceeds the remaining buffer. The
    /// canonical malformed-message signal.
    #[error("insufficient data: {needed} more byte(s) declared than present")]
    InsufficientData { needed: usize },
    #[error("header string is missing its NUL terminator")]
    MissingTerminator,
    #[error("header string is not valid UTF-8")]
    InvalidUtf8,
    #[error("meta key is empty")]
    EmptyKey,
    #[error("malformed UUID field")]
    InvalidUuid,
    #[error("unknown control message type {0:#06x}")]
    UnknownType(u16),
    #[error("protocol version mismatch: got {0:#06x}")]
    VersionMismatch(u16),
    #[error("unsupported data scheme version {0}")]
    UnsupportedScheme(u8),
    #[error("unsupported handshake frame kind {0:#04x}")]
    UnsupportedHandshake(u8),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::InsufficientData {
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

macro_rules! checked_reader {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $get:ident) => {
        $(#[$doc])*
        pub fn $name(buf: &mut impl Buf) -> Result<$ty, DecodeError> {
            ensure(buf, std::mem::size_of::<$ty>())?;
            Ok(buf.$get())
        }
    };
}

checked_reader!(get_u8, u8, get_u8);
checked_reader!(get_u16, u16, get_u16);
checked_reader!(get_u32, u32, get_u32);
checked_reader!(get_u64, u64, get_u64);
checked_reader!(get_i8, i8, get_i8);
checked_reader!(get_i16, i16, get_i16);
checked_reader!(get_i32, i32, get_i32);
checked_reader!(get_i64, i64, get_i64);
checked_reader!(get_f32, f32, get_f32);
checked_reader!(get_f64, f64, get_f64);

/// Number of bytes [`put_compact`] will use for `value`.
pub fn compact_len(value: u64) -> usize {
    if value < u64::from(COMPACT_MARKER_U16) {
        1
    } else if value <= u64::from(u16::MAX) {
        3
    } else {
        9
    }
}

/// Writes a self-framing variable-length unsigned integer: values below 254
/// as a single byte, values below 2^16 as marker 254 plus two bytes, larger
/// values as marker 255 plus eight bytes.
pub fn put_compact(buf: &mut BytesMut, value: u64) {
    if value < u64::from(COMPACT_MARKER_U16) {
        buf.put_u8(value as u8);
    } else if value <= u64::from(u16::MAX) {
        buf.put_u8(COMPACT_MARKER_U16);
        buf.put_u16(value as u16);
    } else {
        buf.put_u8(COMPACT_MARKER_U64);
        buf.put_u64(value);
    }
}

/// Reads a compact unsigned integer written by [`put_compact`].
pub fn get_compact(buf: &mut impl Buf) -> Result<u64, DecodeError> {
    match get_u8(buf)? {
        COMPACT_MARKER_U16 => Ok(u64::from(get_u16(buf)?)),
        COMPACT_MARKER_U64 => get_u64(buf),
        byte => Ok(u64::from(byte)),
    }
}

/// Writes `s` as a NUL-terminated byte string. An interior NUL truncates the
/// string at that point, mirroring a C `strnlen` writer.
pub fn put_cstr(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    buf.put_slice(&bytes[..end]);
    buf.put_u8(0);
}

/// Reads a NUL-terminated UTF-8 string.
pub fn get_cstr(buf: &mut impl Buf) -> Result<String, DecodeError> {
    let chunk = buf.chunk();
    // Control and header strings always fit one contiguous chunk here; the
    // callers hand in `Bytes`/`BytesMut` slices, never rope-like buffers.
    let end = chunk
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::MissingTerminator)?;
    let s = std::str::from_utf8(&chunk[..end])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_owned();
    buf.advance(end + 1);
    Ok(s)
}

/// Writes a UUID as 16 raw bytes.
pub fn put_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

/// Reads a 16-raw-byte UUID.
pub fn get_uuid(buf: &mut impl Buf) -> Result<Uuid, DecodeError> {
    ensure(buf, 16)?;
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

/// Writes a UUID in its hyphenated string form, NUL-terminated.
pub fn put_uuid_str(buf: &mut BytesMut, uuid: &Uuid) {
    let mut text = [0u8; uuid::fmt::Hyphenated::LENGTH];
    buf.put_slice(uuid.hyphenated().encode_lower(&mut text).as_bytes());
    buf.put_u8(0);
}

/// Reads a NUL-terminated hyphenated UUID string.
pub fn get_uuid_str(buf: &mut impl Buf) -> Result<Uuid, DecodeError> {
    let text = get_cstr(buf)?;
    Uuid::parse_str(&text).map_err(|_| DecodeError::InvalidUuid)
}

/// Serializes meta pairs as consecutive NUL-terminated key/value strings.
pub fn put_meta_block(buf: &mut BytesMut, meta: &[(String, String)]) {
    for (key, value) in meta {
        put_cstr(buf, key);
        put_cstr(buf, value);
    }
}

/// Byte length [`put_meta_block`] will produce.
pub fn meta_block_len(meta: &[(String, String)]) -> usize {
    meta.iter().map(|(k, v)| k.len() + v.len() + 2).sum()
}

/// Reads exactly `len` bytes of meta pairs. Reading stops at the declared
/// length, never at a NUL count, so a truncated final pair surfaces as a
/// decode error instead of a short map.
pub fn get_meta_block(buf: &mut impl Buf, len: usize) -> Result<Vec<(String, String)>, DecodeError> {
    ensure(buf, len)?;
    let mut block = buf.copy_to_bytes(len);
    let mut meta = Vec::new();
    while block.has_remaining() {
        let key = get_cstr(&mut block)?;
        if key.is_empty() {
            return Err(DecodeError::EmptyKey);
        }
        let value = get_cstr(&mut block)?;
        meta.push((key, value));
    }
    Ok(meta)
}
