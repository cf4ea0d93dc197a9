// Error type for encoding and framing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max {})", crate::framing::MAX_FRAME_SIZE)]
    FrameTooLarge { len: usize },
}
