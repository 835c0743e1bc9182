use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown status code: {0}")]
    UnknownStatusCode(i32),

    #[error("invalid metadata header: {0}")]
    InvalidMetadataHeader(String),

    #[error("unsupported metadata format version: {0}")]
    UnsupportedMetadataVersion(String),

    #[error("unsupported digest type: {0}")]
    UnsupportedDigestType(i32),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
