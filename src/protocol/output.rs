//! Outgoing byte stream over pooled buffers.
//!
//! PostgreSQL message format:
//! - Type byte (1 byte) - NOT included in length
//! - Length (4 bytes) - includes itself
//! - Payload (Length - 4 bytes)
//!
//! [`OutputStream::init_packet`] reserves the length field and
//! [`OutputStream::complete_packet`] back-patches it once the body is known,
//! even when the packet spans several buffers.

use std::sync::Arc;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::{Error, Result};

/// Location of a reserved length field.
#[derive(Debug, Clone, Copy)]
struct PacketStart {
    buffer: usize,
    offset: usize,
    position: usize,
}

/// Accumulates outgoing bytes into pooled buffers.
#[derive(Debug)]
pub struct OutputStream {
    pool: Arc<BufferPool>,
    buffers: Vec<PooledBuffer>,
    packet: Option<PacketStart>,
    /// Total bytes appended since creation
    position: usize,
}

impl OutputStream {
    /// Create an output stream drawing buffers from `pool`.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            buffers: Vec::new(),
            packet: None,
            position: 0,
        }
    }

    fn current(&mut self) -> Result<&mut PooledBuffer> {
        let needs_buffer = self.buffers.last().is_none_or(PooledBuffer::is_full);
        if needs_buffer {
            self.buffers.push(self.pool.acquire()?);
        }
        self.buffers
            .last_mut()
            .ok_or_else(|| Error::Protocol("output stream has no buffer".into()))
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let taken = self.current()?.append(data);
            self.position += taken;
            data = &data[taken..];
        }
        Ok(())
    }

    /// Write 1-byte unsigned integer.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Write 2-byte big-endian signed integer.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write 4-byte big-endian signed integer.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a single null byte.
    pub fn write_terminator(&mut self) -> Result<()> {
        self.write_u8(0)
    }

    /// Write null-terminated string (PostgreSQL String type).
    pub fn write_cstr(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())?;
        self.write_terminator()
    }

    /// Reserve the 4-byte length field of a new packet.
    ///
    /// For tagged messages write the tag first; the startup packet has none.
    pub fn init_packet(&mut self) -> Result<()> {
        if self.packet.is_some() {
            return Err(Error::Protocol("packet already in progress".into()));
        }
        // Make sure the first length byte lands in the buffer we record
        self.current()?;
        let buffer = self.buffers.len() - 1;
        let offset = self.buffers[buffer].len();
        self.packet = Some(PacketStart {
            buffer,
            offset,
            position: self.position,
        });
        self.write_bytes(&[0; 4])
    }

    /// Fill in the length of the packet opened by [`init_packet`](Self::init_packet).
    pub fn complete_packet(&mut self) -> Result<()> {
        let start = self
            .packet
            .take()
            .ok_or_else(|| Error::Protocol("no packet in progress".into()))?;
        let len = i32::try_from(self.position - start.position)
            .map_err(|_| Error::Protocol("packet exceeds maximum length".into()))?;

        let (mut buffer, mut offset) = (start.buffer, start.offset);
        for byte in len.to_be_bytes() {
            loop {
                let buf = self
                    .buffers
                    .get_mut(buffer)
                    .ok_or_else(|| Error::Protocol("packet length field was released".into()))?;
                if let Some(slot) = buf.filled_mut().get_mut(offset) {
                    *slot = byte;
                    offset += 1;
                    break;
                }
                buffer += 1;
                offset = 0;
            }
        }
        Ok(())
    }

    /// Buffers holding data not yet handed to the socket, in write order.
    pub fn written_buffers(&self) -> &[PooledBuffer] {
        &self.buffers
    }

    /// Mutable access for recording flush progress.
    pub fn written_buffers_mut(&mut self) -> &mut [PooledBuffer] {
        &mut self.buffers
    }

    /// Detach the first `count` buffers, returning them in write order.
    ///
    /// Dropping the returned buffers releases them to the pool. Any packet
    /// still open inside a detached buffer can no longer be completed.
    pub fn remove_buffers(&mut self, count: usize) -> Vec<PooledBuffer> {
        let count = count.min(self.buffers.len());
        if let Some(start) = self.packet.as_mut() {
            match start.buffer.checked_sub(count) {
                Some(buffer) => start.buffer = buffer,
                None => self.packet = None,
            }
        }
        self.buffers.drain(..count).collect()
    }

    /// Number of bytes buffered and not yet handed to the socket.
    pub fn pending(&self) -> usize {
        self.buffers.iter().map(|b| b.unflushed().len()).sum()
    }

    /// Returns true if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(|b| !b.has_remaining())
    }

    /// Release every buffer, discarding unsent data.
    pub fn clear(&mut self) {
        self.packet = None;
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::parse_frame;

    fn collect(out: &OutputStream) -> Vec<u8> {
        out.written_buffers()
            .iter()
            .flat_map(|b| b.filled().to_vec())
            .collect()
    }

    #[test]
    fn test_packet_length_backpatch() {
        let mut out = OutputStream::new(Arc::new(BufferPool::new(4, 64)));
        out.write_u8(b'Q').unwrap();
        out.init_packet().unwrap();
        out.write_cstr("SELECT 1").unwrap();
        out.complete_packet().unwrap();

        let bytes = collect(&out);
        assert_eq!(bytes[0], b'Q');
        assert_eq!(&bytes[1..5], &13_i32.to_be_bytes());
        assert_eq!(&bytes[5..], b"SELECT 1\0");
    }

    #[test]
    fn test_length_field_straddles_buffers() {
        // 3-byte buffers force the length field across a boundary
        let pool = Arc::new(BufferPool::new(8, 3));
        let mut out = OutputStream::new(pool);
        out.write_bytes(b"ab").unwrap();
        out.write_u8(b'P').unwrap();
        out.init_packet().unwrap();
        out.write_cstr("s1").unwrap();
        out.write_i16(0).unwrap();
        out.complete_packet().unwrap();

        assert!(out.written_buffers().len() > 2);
        let bytes = collect(&out);
        let parsed = parse_frame(&bytes, 2, bytes.len()).unwrap().unwrap();
        assert_eq!(parsed.frame.tag, b'P');
        assert_eq!(parsed.frame.payload, b"s1\0\0\0");
        assert_eq!(parsed.consumed + 2, bytes.len());
    }

    #[test]
    fn test_packet_round_trip_through_parser() {
        let mut out = OutputStream::new(Arc::new(BufferPool::new(8, 5)));
        out.write_u8(b'B').unwrap();
        out.init_packet().unwrap();
        out.write_cstr("p1").unwrap();
        out.write_i32(-1).unwrap();
        out.write_bytes(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        out.complete_packet().unwrap();

        let bytes = collect(&out);
        let parsed = parse_frame(&bytes, 0, bytes.len()).unwrap().unwrap();
        assert_eq!(parsed.frame.tag, b'B');
        assert_eq!(
            parsed.frame.payload,
            b"p1\0\xff\xff\xff\xff\x01\x02\x03\x04\x05\x06\x07"
        );
    }

    #[test]
    fn test_complete_without_init_fails() {
        let mut out = OutputStream::new(Arc::new(BufferPool::new(1, 16)));
        assert!(out.complete_packet().is_err());
        out.init_packet().unwrap();
        assert!(out.init_packet().is_err());
    }

    #[test]
    fn test_remove_buffers_releases_to_pool() {
        let pool = Arc::new(BufferPool::new(8, 4));
        let mut out = OutputStream::new(Arc::clone(&pool));
        out.write_bytes(&[7; 10]).unwrap();
        assert_eq!(out.written_buffers().len(), 3);
        assert_eq!(out.pending(), 10);

        let removed = out.remove_buffers(2);
        assert_eq!(removed.len(), 2);
        assert_eq!(out.written_buffers().len(), 1);
        drop(removed);
        assert_eq!(pool.available(), 2);

        // New writes go to a fresh buffer once the current one fills
        out.write_bytes(&[1; 3]).unwrap();
        assert_eq!(out.pending(), 5);
    }
}
