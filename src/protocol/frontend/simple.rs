//! Simple query protocol messages.

use crate::error::Result;
use crate::protocol::output::OutputStream;

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by semicolons.
pub fn write_query(out: &mut OutputStream, query: &str) -> Result<()> {
    super::begin(out, super::msg_type::QUERY)?;
    out.write_cstr(query)?;
    out.complete_packet()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::protocol::frontend::written;

    #[test]
    fn test_query() {
        let mut out = OutputStream::new(Arc::new(BufferPool::new(4, 64)));
        write_query(&mut out, "SELECT 1").unwrap();
        let buf = written(&out);

        assert_eq!(buf[0], b'Q');
        // 4 (length field) + 9 (query + null terminator)
        assert_eq!(&buf[1..5], &13_i32.to_be_bytes());
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }
}
