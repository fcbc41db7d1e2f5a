//! Error types for the wire format.

/// Errors produced while decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes without terminator (max {max})")]
    FrameTooLarge { len: usize, max: usize },
}
