use bk_types::LedgerId;

/// Errors from digest construction and frame verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("unsupported digest type: {0}")]
    UnsupportedDigestType(i32),

    #[error("invalid digest key: {0}")]
    InvalidKey(String),

    #[error("frame too short: {actual} bytes, need at least {required}")]
    FrameTooShort { required: usize, actual: usize },

    #[error("frame belongs to ledger {actual}, expected {expected}")]
    LedgerMismatch { expected: LedgerId, actual: LedgerId },

    #[error("digest mismatch for entry {entry_id}")]
    DigestMismatch { entry_id: i64 },
}

pub type DigestResult<T> = Result<T, DigestError>;
