use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown digest type tag: {0}")]
    UnknownDigestType(i32),

    #[error("unknown ledger state tag: {0}")]
    UnknownLedgerState(i32),

    #[error("ledger id must be non-negative, got {0}")]
    NegativeLedgerId(i64),

    #[error("invalid ledger path: {0}")]
    InvalidLedgerPath(String),

    #[error("invalid ledger metadata: {0}")]
    InvalidMetadata(String),
}
