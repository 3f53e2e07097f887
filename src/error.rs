//! Crate-wide error type.
//!
//! Most protocol violations are handled by logging a warning and dropping
//! the query (see `spec.md` §7) rather than by propagating an `Err` — this
//! type exists for the failure modes that a caller actually needs to react
//! to: decode failures, pool exhaustion, and controller I/O.

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("base32 decode failed: {0}")]
    Base32Decode(String),

    #[error("no free client ids available")]
    PoolExhausted,

    #[error("fragment buffer overflow: {current} + {incoming} > {expected}")]
    FragmentOverflow {
        current: usize,
        incoming: usize,
        expected: usize,
    },

    #[error("block index {index} out of range for {len} bytes at block size {block_size}")]
    BlockIndexOutOfRange {
        index: usize,
        len: usize,
        block_size: usize,
    },

    #[error("malformed dns message: {0}")]
    MalformedMessage(String),

    #[error("controller io error: {0}")]
    ControllerIo(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
