//! Line-based codec for tokio.
//!
//! Frames a byte stream on `\n` and hands out raw octets, leaving text
//! decoding to [`Message::parse`](crate::Message::parse) so that mixed
//! encodings survive framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error;

/// Upper bound on an inbound line, tags included.
pub const MAX_IRC_LINE_LEN: usize = 8191 + 512;

/// Line-based codec that handles newline-terminated messages.
///
/// Over-long lines are cut at the limit and the remainder up to the next
/// newline is discarded, so one bad line never ends the stream.
pub struct LineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    /// Maximum line length
    max_len: usize,
    /// Skipping the tail of an over-long line
    discarding: bool,
}

impl LineCodec {
    /// Create a codec with the default limit.
    pub fn new() -> Self {
        Self::with_max_len(MAX_IRC_LINE_LEN)
    }

    /// Create a codec with a custom max line length.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Bytes>> {
        loop {
            match src[self.next_index..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    let line = src.split_to(self.next_index + offset + 1);
                    self.next_index = 0;

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    return Ok(Some(line.freeze()));
                }
                None if self.discarding => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                None if src.len() > self.max_len => {
                    let head = src.split_to(self.max_len);
                    src.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(head.freeze()));
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> error::Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() || self.discarding => Ok(None),
            None => {
                self.next_index = 0;
                Ok(Some(src.split().freeze()))
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> error::Result<()> {
        dst.extend_from_slice(msg.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :test\r\n");

        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"PING :test\r\n")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"x\r\nPONG");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"PING :x\r\n"))
        );
        assert_eq!(&buf[..], b"PONG");
    }

    #[test]
    fn test_decode_too_long_is_cut_and_skipped() {
        let mut codec = LineCodec::with_max_len(10);
        let mut buf = BytesMut::from("this is way too long");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"this is wa"))
        );
        buf.extend_from_slice(b" still\nPING\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"PING\n"))
        );
    }

    #[test]
    fn test_decode_eof_flushes_partial() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("QUIT");
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Bytes::from_static(b"QUIT"))
        );
    }

    #[test]
    fn test_encode() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        codec.encode("PONG :test\r\n".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :test\r\n");
    }
}
