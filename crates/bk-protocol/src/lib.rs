//! Wire protocol between the bookie client and storage nodes.
//!
//! Two independent formats live here:
//!
//! - the request/response protocol spoken over TCP to bookies, framed as a
//!   4-byte big-endian length followed by a protobuf message, and
//! - the versioned ledger metadata record stored in the coordination service.

pub mod codec;
pub mod error;
pub mod message;
pub mod metadata;

pub use codec::{BookieCodec, MAX_FRAME_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    AddRequest, AddResponse, BkPacketHeader, OperationType, ProtocolVersion, Request, Response,
    StatusCode,
};
pub use metadata::{parse_metadata, serialize_metadata, METADATA_FORMAT_VERSION};
