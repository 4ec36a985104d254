//! Extended query protocol messages.

use crate::error::{Error, Result};
use crate::protocol::output::OutputStream;
use crate::protocol::types::{FormatCode, Oid, Param};

fn count(what: &str, n: usize) -> Result<i16> {
    i16::try_from(n).map_err(|_| Error::InvalidUsage(format!("too many {what}: {n}")))
}

/// Write a Parse message to create a prepared statement.
///
/// `param_oids` may be empty to let the server infer every parameter type.
pub fn write_parse(
    out: &mut OutputStream,
    name: &str,
    query: &str,
    param_oids: &[Oid],
) -> Result<()> {
    super::begin(out, super::msg_type::PARSE)?;
    out.write_cstr(name)?;
    out.write_cstr(query)?;
    out.write_i16(count("parameter types", param_oids.len())?)?;
    for &oid in param_oids {
        out.write_i32(oid as i32)?;
    }
    out.complete_packet()
}

/// Write a Bind message creating `portal` from `statement`.
///
/// Parameter format codes are sent one per parameter; a NULL value is sent
/// as length -1 with no bytes.
pub fn write_bind(
    out: &mut OutputStream,
    portal: &str,
    statement: &str,
    params: &[Param],
    result_formats: &[FormatCode],
) -> Result<()> {
    let param_count = count("parameters", params.len())?;
    let format_count = count("result formats", result_formats.len())?;

    super::begin(out, super::msg_type::BIND)?;
    out.write_cstr(portal)?;
    out.write_cstr(statement)?;

    out.write_i16(param_count)?;
    for param in params {
        out.write_i16(param.format.as_i16())?;
    }

    out.write_i16(param_count)?;
    for param in params {
        match &param.value {
            None => out.write_i32(-1)?,
            Some(value) => {
                let len = i32::try_from(value.len()).map_err(|_| {
                    Error::InvalidUsage(format!("parameter of {} bytes is too large", value.len()))
                })?;
                out.write_i32(len)?;
                out.write_bytes(value)?;
            }
        }
    }

    out.write_i16(format_count)?;
    for format in result_formats {
        out.write_i16(format.as_i16())?;
    }
    out.complete_packet()
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(out: &mut OutputStream, portal: &str) -> Result<()> {
    super::begin(out, super::msg_type::DESCRIBE)?;
    out.write_u8(b'P')?;
    out.write_cstr(portal)?;
    out.complete_packet()
}

/// Write an Execute message to run a portal.
///
/// `max_rows` of 0 means no limit.
pub fn write_execute(out: &mut OutputStream, portal: &str, max_rows: u32) -> Result<()> {
    super::begin(out, super::msg_type::EXECUTE)?;
    out.write_cstr(portal)?;
    let max_rows = i32::try_from(max_rows).map_err(|_| {
        Error::InvalidUsage(format!("row limit {max_rows} exceeds {}", i32::MAX))
    })?;
    out.write_i32(max_rows)?;
    out.complete_packet()
}

/// Write a Sync message, closing the current extended-query cycle.
pub fn write_sync(out: &mut OutputStream) -> Result<()> {
    super::begin(out, super::msg_type::SYNC)?;
    out.complete_packet()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::protocol::frontend::written;

    fn stream() -> OutputStream {
        OutputStream::new(Arc::new(BufferPool::new(8, 32)))
    }

    #[test]
    fn test_parse() {
        let mut out = stream();
        write_parse(&mut out, "s1", "SELECT $1::int", &[]).unwrap();
        let buf = written(&out);
        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(&buf[5..], b"s1\0SELECT $1::int\0\0\0");
    }

    #[test]
    fn test_bind_layout() {
        let mut out = stream();
        let params = [Param::binary(42_i32.to_be_bytes()), Param::null()];
        write_bind(&mut out, "p1", "s1", &params, &[]).unwrap();

        let mut expected = vec![b'B'];
        let body: Vec<u8> = [
            &b"p1\0s1\0"[..],
            &[0, 2, 0, 1, 0, 0],
            &[0, 2],
            &[0, 0, 0, 4, 0, 0, 0, 42],
            &[0xff, 0xff, 0xff, 0xff],
            &[0, 0],
        ]
        .concat();
        expected.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        expected.extend_from_slice(&body);
        assert_eq!(written(&out), expected);
    }

    #[test]
    fn test_describe_execute_sync() {
        let mut out = stream();
        write_describe_portal(&mut out, "p1").unwrap();
        write_execute(&mut out, "p1", 0).unwrap();
        write_sync(&mut out).unwrap();

        let expected: Vec<u8> = [
            &[b'D', 0, 0, 0, 8, b'P'][..],
            b"p1\0",
            &[b'E', 0, 0, 0, 11],
            b"p1\0",
            &[0, 0, 0, 0],
            &[b'S', 0, 0, 0, 4],
        ]
        .concat();
        assert_eq!(written(&out), expected);
    }

    #[test]
    fn test_execute_row_limit_fits_i32() {
        let mut out = stream();
        write_execute(&mut out, "", i32::MAX as u32).unwrap();
        assert_eq!(&written(&out)[6..], &i32::MAX.to_be_bytes());

        let mut out = stream();
        let err = write_execute(&mut out, "", i32::MAX as u32 + 1).unwrap_err();
        assert!(matches!(err, Error::InvalidUsage(_)));
    }
}
