//! Protobuf messages of the bookie request/response protocol.
//!
//! Field numbers follow the upstream proto2 schema so frames interoperate
//! with stock bookies. Only the add-entry operation is modelled.

use bytes::Bytes;
use prost::Message;

use crate::error::{ProtocolError, ProtocolResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    VersionOne = 1,
    VersionTwo = 2,
    VersionThree = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OperationType {
    ReadEntry = 1,
    AddEntry = 2,
    RangeReadEntry = 3,
    RangeAddEntry = 4,
    Auth = 5,
    WriteLac = 6,
    ReadLac = 7,
    GetBookieInfo = 8,
    StartTls = 9,
    ForceLedger = 10,
    GetListOfEntriesOfLedger = 11,
}

/// Result codes returned by bookies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Eok = 0,
    Enoledger = 402,
    Enoentry = 403,
    Ebadreq = 404,
    Eio = 501,
    Eua = 502,
    Ebadversion = 503,
    Efenced = 504,
    Ereadonly = 505,
    Etoomanyrequests = 506,
    Eunknownledgerstate = 507,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        self == Self::Eok
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Eok => "EOK",
            Self::Enoledger => "ENOLEDGER",
            Self::Enoentry => "ENOENTRY",
            Self::Ebadreq => "EBADREQ",
            Self::Eio => "EIO",
            Self::Eua => "EUA",
            Self::Ebadversion => "EBADVERSION",
            Self::Efenced => "EFENCED",
            Self::Ereadonly => "EREADONLY",
            Self::Etoomanyrequests => "ETOOMANYREQUESTS",
            Self::Eunknownledgerstate => "EUNKNOWNLEDGERSTATE",
        }
    }
}

/// Header shared by every request and echoed in the matching response.
#[derive(Clone, PartialEq, Message)]
pub struct BkPacketHeader {
    #[prost(enumeration = "ProtocolVersion", required, tag = "1")]
    pub version: i32,
    #[prost(enumeration = "OperationType", required, tag = "2")]
    pub operation: i32,
    #[prost(uint64, required, tag = "3")]
    pub txn_id: u64,
    #[prost(uint32, optional, tag = "4")]
    pub priority: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AddRequest {
    #[prost(int64, required, tag = "1")]
    pub ledger_id: i64,
    #[prost(int64, required, tag = "2")]
    pub entry_id: i64,
    /// Ledger access key authorizing the write.
    #[prost(bytes = "bytes", required, tag = "3")]
    pub master_key: Bytes,
    /// Digest-protected entry frame.
    #[prost(bytes = "bytes", required, tag = "4")]
    pub body: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct AddResponse {
    #[prost(enumeration = "StatusCode", required, tag = "1")]
    pub status: i32,
    #[prost(int64, required, tag = "2")]
    pub ledger_id: i64,
    #[prost(int64, required, tag = "3")]
    pub entry_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(message, required, tag = "1")]
    pub header: BkPacketHeader,
    #[prost(message, optional, tag = "101")]
    pub add_request: Option<AddRequest>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(message, required, tag = "1")]
    pub header: BkPacketHeader,
    #[prost(enumeration = "StatusCode", required, tag = "2")]
    pub status: i32,
    #[prost(message, optional, tag = "101")]
    pub add_response: Option<AddResponse>,
}

impl BkPacketHeader {
    pub fn new(operation: OperationType, txn_id: u64) -> Self {
        Self {
            version: ProtocolVersion::VersionThree as i32,
            operation: operation as i32,
            txn_id,
            priority: None,
        }
    }
}

impl Request {
    /// An add-entry request carrying one entry frame.
    pub fn add_entry(
        txn_id: u64,
        ledger_id: i64,
        entry_id: i64,
        master_key: Bytes,
        body: Bytes,
    ) -> Self {
        Self {
            header: BkPacketHeader::new(OperationType::AddEntry, txn_id),
            add_request: Some(AddRequest {
                ledger_id,
                entry_id,
                master_key,
                body,
            }),
        }
    }

    pub fn txn_id(&self) -> u64 {
        self.header.txn_id
    }
}

impl Response {
    /// The response a bookie sends for an add-entry request.
    pub fn add_entry(txn_id: u64, status: StatusCode, ledger_id: i64, entry_id: i64) -> Self {
        Self {
            header: BkPacketHeader::new(OperationType::AddEntry, txn_id),
            status: status as i32,
            add_response: Some(AddResponse {
                status: status as i32,
                ledger_id,
                entry_id,
            }),
        }
    }

    pub fn txn_id(&self) -> u64 {
        self.header.txn_id
    }

    /// Outcome of an add-entry call.
    ///
    /// A non-OK top-level status wins; otherwise the add-specific status is
    /// reported. Codes outside [`StatusCode`] are surfaced as errors instead of
    /// silently mapping to the enum default.
    pub fn add_outcome(&self) -> ProtocolResult<StatusCode> {
        let top = StatusCode::try_from(self.status)
            .map_err(|_| ProtocolError::UnknownStatusCode(self.status))?;
        if !top.is_ok() {
            return Ok(top);
        }
        let add = self
            .add_response
            .as_ref()
            .ok_or(ProtocolError::MissingField("addResponse"))?;
        StatusCode::try_from(add.status).map_err(|_| ProtocolError::UnknownStatusCode(add.status))
    }
}
