//! StartupMessage and Terminate.

use crate::error::Result;
use crate::protocol::output::OutputStream;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// Write a StartupMessage (no tag byte).
///
/// `params` are (name, value) pairs; `user` is required by the server.
pub fn write_startup(out: &mut OutputStream, params: &[(&str, &str)]) -> Result<()> {
    out.init_packet()?;
    out.write_i32(PROTOCOL_VERSION_3_0)?;
    for (name, value) in params {
        out.write_cstr(name)?;
        out.write_cstr(value)?;
    }
    out.write_terminator()?;
    out.complete_packet()
}

/// Write a Terminate message.
pub fn write_terminate(out: &mut OutputStream) -> Result<()> {
    super::begin(out, super::msg_type::TERMINATE)?;
    out.complete_packet()
}
