//! PostgreSQL frontend (client → server) messages.
//!
//! Every writer appends one complete message to an
//! [`OutputStream`](crate::protocol::output::OutputStream).

pub mod auth;
pub mod extended;
pub mod simple;
pub mod startup;

pub use auth::{md5_password, write_password, write_sasl_initial_response, write_sasl_response};
pub use extended::{write_bind, write_describe_portal, write_execute, write_parse, write_sync};
pub use simple::write_query;
pub use startup::{write_startup, write_terminate};

use crate::error::{Error, Result};
use crate::protocol::output::OutputStream;

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Write the tag and reserve the length of a tagged message.
fn begin(out: &mut OutputStream, tag: u8) -> Result<()> {
    out.write_u8(tag)?;
    out.init_packet()
}

/// Fail if `s` can't be sent as a null-terminated string.
pub fn check_cstr(what: &str, s: &str) -> Result<()> {
    if memchr::memchr(0, s.as_bytes()).is_some() {
        return Err(Error::InvalidUsage(format!("{what} contains a NUL byte")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn written(out: &OutputStream) -> Vec<u8> {
    out.written_buffers()
        .iter()
        .flat_map(|b| b.filled().iter().copied())
        .collect()
}
