/// Errors reported by the packet buffer.
///
/// Exhaustion is an expected outcome: callers drop the packet and count it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PktBufError {
    #[error("size must be non-zero")]
    ZeroSize,
    #[error("size {0} exceeds the snippet size limit")]
    TooLarge(usize),
    #[error("an in-place header needs a packet to carve from")]
    MissingPacket,
    #[error("header source holds {actual} bytes, {expected} requested")]
    SourceTooShort { expected: usize, actual: usize },
    #[error("no space left in packet buffer")]
    OutOfMemory,
    #[error("no free snippet record")]
    OutOfRecords,
    #[error("snippet was already released")]
    StaleSnip,
    #[error("snippet data is not owned by the packet buffer")]
    NotOwned,
    #[error("snippet has more than one user")]
    Shared,
    #[error("snippet is part of a chain")]
    Chained,
}

pub type Result<T> = core::result::Result<T, PktBufError>;
