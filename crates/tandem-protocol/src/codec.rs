//! Newline-delimited frame codec.
//!
//! Splits an inbound byte stream on `\n` and yields one raw frame per line;
//! JSON strings cannot contain a raw newline, so a literal `\n` is always a
//! frame boundary. Outbound frames are written as the serialized line plus a
//! single terminator. A frame larger than the configured maximum is an
//! error; partial data left at end-of-stream is discarded.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Error)]
pub enum FrameCodecError {
    #[error("frame exceeds the {0}-byte limit")]
    FrameTooLong(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    /// Offset into the buffer already scanned for a terminator.
    next_index: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = FrameCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FrameCodecError> {
        match buf[self.next_index..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let end = self.next_index + pos;
                // The limit counts the terminator.
                if end + 1 > self.max_frame_bytes {
                    return Err(FrameCodecError::FrameTooLong(self.max_frame_bytes));
                }
                let mut frame = buf.split_to(end + 1);
                self.next_index = 0;
                frame.truncate(frame.len() - 1);
                if frame.last() == Some(&b'\r') {
                    frame.truncate(frame.len() - 1);
                }
                Ok(Some(frame.to_vec()))
            }
            None => {
                if buf.len() >= self.max_frame_bytes {
                    return Err(FrameCodecError::FrameTooLong(self.max_frame_bytes));
                }
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FrameCodecError> {
        // Bytes with no terminator at EOF are not a frame.
        buf.clear();
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), FrameCodecError> {
        buf.reserve(line.len() + 1);
        buf.put(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(Some(frame)) = codec.decode(buf) {
            out.push(frame);
        }
        out
    }

    #[test]
    fn splits_on_newline() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"event\":\"a\"}\n{\"event\":\"b\"}\n"[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![b"{\"event\":\"a\"}".to_vec(), b"{\"event\":\"b\"}".to_vec()]);
    }

    #[test]
    fn buffers_partial_frames_across_reads() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"event\":"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"cursor_move\"}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, b"{\"event\":\"cursor_move\"}");
    }

    #[test]
    fn strips_carriage_return() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"event\":\"a\"}\r\n"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, b"{\"event\":\"a\"}");
    }

    #[test]
    fn oversize_without_terminator_errors() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&b"aaaaaaaaaaaaaaaaaaaaaaaa"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameCodecError::FrameTooLong(16))
        ));
    }

    #[test]
    fn oversize_with_terminator_errors() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"aaaaaaaaaaaa\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameCodecError::FrameTooLong(8))
        ));
    }

    #[test]
    fn frame_at_exact_limit_passes() {
        // 7 bytes of payload + terminator == 8-byte limit
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"aaaaaaa\n"[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, b"aaaaaaa");
    }

    #[test]
    fn partial_data_at_eof_is_discarded() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"event\":\"trailing\"}"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn encoder_appends_terminator() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        codec
            .encode("{\"event\":\"error\"}".to_string(), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"{\"event\":\"error\"}\n");
    }

    #[test]
    fn scan_offset_resets_between_frames() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"first"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b" frame\nsecond frame\n");
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![b"first frame".to_vec(), b"second frame".to_vec()]);
    }
}
