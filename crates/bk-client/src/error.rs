use std::time::Duration;

use bk_digest::DigestError;
use bk_protocol::ProtocolError;
use bk_types::{BookieAddr, EntryId, LedgerId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not enough bookies: need {required}, {available} available")]
    InsufficientBookies { required: usize, available: usize },

    #[error("unsupported digest type: {0}")]
    UnsupportedDigestType(i32),

    #[error("connection to {addr} lost: {reason}")]
    ConnectionLost { addr: BookieAddr, reason: String },

    #[error("request to {addr} timed out after {timeout:?}")]
    Timeout { addr: BookieAddr, timeout: Duration },

    #[error("ledger {ledger_id} is fenced")]
    Fenced { ledger_id: LedgerId },

    #[error("malformed response from {addr}: {reason}")]
    ProtocolDecode { addr: BookieAddr, reason: String },

    #[error("bookie {addr} rejected entry {entry_id}: {status}")]
    BookieError {
        addr: BookieAddr,
        entry_id: EntryId,
        status: String,
    },

    #[error("entry {entry_id} got {acked} of {required} acknowledgements: {}", .failures.join("; "))]
    QuorumNotReached {
        entry_id: EntryId,
        acked: usize,
        required: usize,
        failures: Vec<String>,
        /// Every failure behind the decision was transient, so the same
        /// data may be written to a new ledger on the same bookies.
        transient: bool,
    },

    #[error("ledger {0} is closed")]
    LedgerClosed(LedgerId),

    #[error("ledger {ledger_id} stopped accepting appends after entry {entry_id} failed")]
    LedgerErrored {
        ledger_id: LedgerId,
        entry_id: EntryId,
    },

    #[error("no ensemble covers entry {0}")]
    NoEnsemble(EntryId),

    #[error("metadata for ledger {0} already exists")]
    MetadataExists(LedgerId),

    #[error("metadata for ledger {0} not found")]
    MetadataNotFound(LedgerId),

    #[error("coordination error: {0}")]
    Coordination(String),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("digest error: {0}")]
    Digest(DigestError),

    #[error("invalid ledger data: {0}")]
    Types(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether re-sending the same request may succeed.
    ///
    /// A failed append is never retryable on its handle: the entry id it
    /// consumed can no longer be confirmed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::Timeout { .. } | Self::ProtocolDecode { .. }
        )
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedDigestType(tag) => Self::UnsupportedDigestType(tag),
            other => Self::Protocol(other),
        }
    }
}

impl From<DigestError> for ClientError {
    fn from(err: DigestError) -> Self {
        match err {
            DigestError::UnsupportedDigestType(tag) => Self::UnsupportedDigestType(tag),
            other => Self::Digest(other),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
