//! Frame codec: one JSON document per `\n`-terminated line.
//!
//! Splits a TCP byte stream on newlines, parses each line into a
//! [`Frame`], and serializes outgoing frames with `\n` termination.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::wire::Frame;

/// Maximum frame length (excluding the trailing `\n`).
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Codec error: an oversized line, malformed JSON, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame exceeds maximum length ({MAX_FRAME_LENGTH} bytes)")]
    FrameTooLong,
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_FRAME_LENGTH {
                    return Err(CodecError::FrameTooLong);
                }
                return Ok(None);
            };

            if pos > MAX_FRAME_LENGTH {
                return Err(CodecError::FrameTooLong);
            }

            let line = src.split_to(pos);
            src.advance(1);

            // Blank keepalive lines carry no frame.
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        // Never emit a line the peer's decoder would refuse.
        if json.len() > MAX_FRAME_LENGTH {
            return Err(CodecError::FrameTooLong);
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
