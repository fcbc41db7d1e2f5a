//! Text frames delimited by `0x00` and `0xFF`.
//!
//! # Wire format
//!
//! ```text
//! SEND:    [0x00][payload bytes][0xFF]
//! RECEIVE: [payload bytes][0xFF]
//! ```
//!
//! Only the `0xFF` terminator drives frame boundaries on the receive path.
//! A single `0x00` at the very start of a frame is the peer's start marker
//! and is dropped; every other byte is payload.

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::ProtocolError;

/// Start-of-frame marker written before every outgoing payload.
pub const FRAME_START: u8 = 0x00;

/// End-of-frame marker.
pub const FRAME_END: u8 = 0xFF;

/// Default upper bound on a single frame payload (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// A decoded frame: the raw bytes between the start of a frame and `0xFF`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload interpreted as text. Invalid UTF-8 is replaced, not rejected.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Appends `text` to `dst` as one outgoing frame.
///
/// UTF-8 never contains `0xFF`, so the payload cannot end the frame early.
pub fn encode_frame(text: &str, dst: &mut BytesMut) {
    dst.reserve(text.len() + 2);
    dst.put_u8(FRAME_START);
    dst.extend_from_slice(text.as_bytes());
    dst.put_u8(FRAME_END);
}

/// Returns `text` as a standalone outgoing frame.
pub fn frame_bytes(text: &str) -> Bytes {
    let mut buf = BytesMut::new();
    encode_frame(text, &mut buf);
    buf.freeze()
}

/// Receive-side decoder for the hixie-75 text frame format.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    /// Bytes of the current frame already scanned for a terminator.
    next_index: usize,
    /// True once the first byte of the current frame has been seen.
    in_frame: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
            in_frame: false,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if !self.in_frame {
            if src.is_empty() {
                return Ok(None);
            }
            if src[0] == FRAME_START {
                src.advance(1);
            }
            self.in_frame = true;
        }

        match src[self.next_index..].iter().position(|b| *b == FRAME_END) {
            Some(offset) => {
                let len = self.next_index + offset;
                if len > self.max_frame_len {
                    return Err(ProtocolError::FrameTooLarge {
                        len,
                        max: self.max_frame_len,
                    });
                }
                let payload = src.split_to(len).freeze();
                src.advance(1);
                self.next_index = 0;
                self.in_frame = false;
                Ok(Some(Frame { payload }))
            }
            None => {
                if src.len() > self.max_frame_len {
                    return Err(ProtocolError::FrameTooLarge {
                        len: src.len(),
                        max: self.max_frame_len,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Unterminated frame at end of stream is dropped.
        src.clear();
        self.next_index = 0;
        self.in_frame = false;
        Ok(None)
    }
}
