//! Backend frame parsing.
//!
//! A backend frame is `tag:1, length:4 (big-endian, includes itself), payload`.
//! A single socket read usually carries several frames and may end in the
//! middle of one, so the parser works on a window of valid bytes and reports
//! how much it consumed.

use crate::error::{Error, Result};

/// Size of the tag plus the length field.
pub const HEADER_LEN: usize = 5;

/// Largest frame length accepted from the server (1 GiB, the server's own
/// allocation limit).
pub const MAX_FRAME_LEN: usize = 0x4000_0000;

/// One backend message: tag plus payload borrowed from the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Message type byte
    pub tag: u8,
    /// Message payload (after the length field)
    pub payload: &'a [u8],
}

/// A complete frame and the number of bytes it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub frame: Frame<'a>,
    pub consumed: usize,
}

/// Parse the frame starting at `offset`, looking only at `buf[..valid]`.
///
/// Returns `Ok(None)` when the window doesn't hold a whole frame yet; the
/// caller keeps the bytes and tries again after the next read. A declared
/// length below 4 or above [`MAX_FRAME_LEN`] is a protocol error.
pub fn parse_frame(buf: &[u8], offset: usize, valid: usize) -> Result<Option<ParsedFrame<'_>>> {
    let window = match buf.get(offset..valid.min(buf.len())) {
        Some(window) => window,
        None => return Ok(None),
    };

    let Some(header) = window.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if len < 4 || len as usize > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "invalid length {} for frame '{}'",
            len, tag as char
        )));
    }

    let consumed = 1 + len as usize;
    match window.get(HEADER_LEN..consumed) {
        Some(payload) => Ok(Some(ParsedFrame {
            frame: Frame { tag, payload },
            consumed,
        })),
        None => Ok(None),
    }
}

/// Total frame size announced by the header at the start of `window`, if the
/// header is present. Used to size the read buffer for large frames.
pub fn announced_len(window: &[u8]) -> Option<usize> {
    let header = window.get(..HEADER_LEN)?;
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    usize::try_from(len).ok().map(|len| len + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn collect_all(stream: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut pos = 0;
        while let Some(parsed) = parse_frame(stream, pos, stream.len()).unwrap() {
            frames.push((parsed.frame.tag, parsed.frame.payload.to_vec()));
            pos += parsed.consumed;
        }
        assert_eq!(pos, stream.len());
        frames
    }

    #[test]
    fn test_parse_single_frame() {
        let bytes = frame_bytes(b'Z', b"I");
        let parsed = parse_frame(&bytes, 0, bytes.len()).unwrap().unwrap();
        assert_eq!(parsed.frame.tag, b'Z');
        assert_eq!(parsed.frame.payload, b"I");
        assert_eq!(parsed.consumed, 6);
    }

    #[test]
    fn test_incomplete_header_and_payload() {
        let bytes = frame_bytes(b'C', b"SELECT 1\0");
        for valid in 0..bytes.len() {
            assert!(parse_frame(&bytes, 0, valid).unwrap().is_none(), "valid={valid}");
        }
        assert!(parse_frame(&bytes, 0, bytes.len()).unwrap().is_some());
    }

    #[test]
    fn test_never_reads_past_valid() {
        // Trailing garbage beyond `valid` must not be touched
        let mut bytes = frame_bytes(b'2', b"");
        let valid = bytes.len();
        bytes.extend_from_slice(&[0xff; 3]);
        let parsed = parse_frame(&bytes, 0, valid).unwrap().unwrap();
        assert_eq!(parsed.consumed, valid);
        assert!(parse_frame(&bytes, valid, valid).unwrap().is_none());
    }

    #[test]
    fn test_offset_within_burst() {
        let mut bytes = frame_bytes(b'1', b"");
        bytes.extend(frame_bytes(b'2', b""));
        bytes.extend(frame_bytes(b'n', b""));
        let frames = collect_all(&bytes);
        let tags: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![b'1', b'2', b'n']);
    }

    #[test]
    fn test_invalid_lengths() {
        let short = [b'E', 0, 0, 0, 3];
        assert!(parse_frame(&short, 0, short.len()).is_err());

        let negative = [b'E', 0xff, 0xff, 0xff, 0xff];
        assert!(parse_frame(&negative, 0, negative.len()).is_err());

        let huge = [b'D', 0x7f, 0xff, 0xff, 0xff];
        assert!(parse_frame(&huge, 0, huge.len()).is_err());
    }

    #[test]
    fn test_split_stream_yields_same_frames() {
        let mut stream = frame_bytes(
            b'T',
            b"\x00\x01id\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x17\x00\x04\xff\xff\xff\xff\x00\x00",
        );
        stream.extend(frame_bytes(b'D', b"\x00\x01\x00\x00\x00\x0242"));
        stream.extend(frame_bytes(b'C', b"SELECT 1\0"));
        stream.extend(frame_bytes(b'Z', b"I"));
        let whole = collect_all(&stream);

        // Feed one byte at a time, keeping unconsumed bytes like the engine does
        let mut pending: Vec<u8> = Vec::new();
        let mut pieced = Vec::new();
        for &byte in &stream {
            pending.push(byte);
            let mut pos = 0;
            while let Some(parsed) = parse_frame(&pending, pos, pending.len()).unwrap() {
                pieced.push((parsed.frame.tag, parsed.frame.payload.to_vec()));
                pos += parsed.consumed;
            }
            pending.drain(..pos);
        }
        assert!(pending.is_empty());
        assert_eq!(whole, pieced);
    }

    #[test]
    fn test_announced_len() {
        let bytes = frame_bytes(b'D', &[0u8; 100]);
        assert_eq!(announced_len(&bytes), Some(105));
        assert_eq!(announced_len(&bytes[..3]), None);
    }
}
