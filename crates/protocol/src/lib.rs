//! Wire format for the hixie-75 WebSocket draft.
//!
//! Two pieces live here:
//! - [`handshake`]: detecting an upgrade request and producing the fixed
//!   `101 Web Socket Protocol Handshake` reply.
//! - [`frame`]: the `0x00 <text> 0xFF` frame format, as a
//!   [`tokio_util::codec::Decoder`] for the receive path and a plain
//!   encoder for the send path.
//!
//! Based on draft-hixie-thewebsocketprotocol-75. There is no masking, no
//! opcodes, no close handshake and no key challenge.

pub mod error;
pub mod frame;
pub mod handshake;

pub use error::ProtocolError;
pub use frame::{
    DEFAULT_MAX_FRAME_LEN, FRAME_END, FRAME_START, Frame, FrameCodec, encode_frame, frame_bytes,
};
pub use handshake::{
    HandshakeOutcome, UPGRADE_SIGNAL, analyze_request, handshake_response, header_end,
    request_target,
};
