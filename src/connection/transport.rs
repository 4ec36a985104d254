//! Non-blocking byte transport driven by readiness events.

use std::io;

/// A non-blocking byte stream.
///
/// Both calls return [`io::ErrorKind::WouldBlock`] when the socket is not
/// ready; the engine then waits for the next readiness event. `Ok(0)` from
/// `try_read` is end of stream.
pub trait Transport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).try_write(buf)
    }
}

/// Readiness the engine wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interest {
    /// Nothing buffered for the socket
    #[default]
    Read,
    /// A short write left bytes behind
    ReadWrite,
}

impl Interest {
    pub fn is_writable(self) -> bool {
        self == Self::ReadWrite
    }
}
