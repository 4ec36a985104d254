//! Decoding primitives for backend payloads.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers. Each
//! reader returns the decoded value and the remaining input.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U32 as U32BE};

use crate::error::{Error, Result};

/// Read 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (value, rest) = I16BE::read_from_prefix(data)
        .map_err(|_| Error::Protocol(format!("read_i16: buffer too short: {} < 2", data.len())))?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (value, rest) = I32BE::read_from_prefix(data)
        .map_err(|_| Error::Protocol(format!("read_i32: buffer too short: {} < 4", data.len())))?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = U32BE::read_from_prefix(data)
        .map_err(|_| Error::Protocol(format!("read_u32: buffer too short: {} < 4", data.len())))?;
    Ok((value.get(), rest))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        ))
    })
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}
