//! Ledger metadata record format.
//!
//! ```text
//! BookieMetadataFormatVersion\t3\n
//! [varint length][LedgerMetadataFormat protobuf]
//! ```

use std::collections::BTreeMap;

use bk_types::{DigestType, LedgerId, LedgerMetadata, LedgerState, INVALID_ENTRY_ID};
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;

use crate::error::{ProtocolError, ProtocolResult};

/// The only metadata format version this client reads and writes.
pub const METADATA_FORMAT_VERSION: u32 = 3;

const VERSION_KEY: &[u8] = b"BookieMetadataFormatVersion\t";
const LINE_SPLITTER: u8 = b'\n';
const MAX_VERSION_DIGITS: usize = 10;

#[derive(Clone, PartialEq, Message)]
struct LedgerMetadataFormat {
    #[prost(int32, required, tag = "1")]
    quorum_size: i32,
    #[prost(int32, required, tag = "2")]
    ensemble_size: i32,
    #[prost(int64, required, tag = "3")]
    length: i64,
    #[prost(int64, optional, tag = "4")]
    last_entry_id: Option<i64>,
    #[prost(int32, required, tag = "5")]
    state: i32,
    #[prost(message, repeated, tag = "6")]
    segment: Vec<Segment>,
    #[prost(int32, optional, tag = "7")]
    digest_type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    password: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "9")]
    ack_quorum_size: Option<i32>,
    #[prost(int64, optional, tag = "10")]
    ctime: Option<i64>,
    #[prost(message, repeated, tag = "11")]
    custom_metadata: Vec<CustomMetadataEntry>,
    #[prost(int64, optional, tag = "12")]
    c_token: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
struct Segment {
    #[prost(string, repeated, tag = "1")]
    ensemble_member: Vec<String>,
    #[prost(int64, required, tag = "2")]
    first_entry_id: i64,
}

#[derive(Clone, PartialEq, Message)]
struct CustomMetadataEntry {
    #[prost(string, optional, tag = "1")]
    key: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    value: Option<Vec<u8>>,
}

/// Serialize metadata into the versioned record stored under the ledger path.
pub fn serialize_metadata(metadata: &LedgerMetadata) -> ProtocolResult<Bytes> {
    let record = LedgerMetadataFormat {
        quorum_size: size_to_wire("writeQuorumSize", metadata.write_quorum_size)?,
        ensemble_size: size_to_wire("ensembleSize", metadata.ensemble_size)?,
        length: metadata.length,
        last_entry_id: Some(metadata.last_entry_id),
        state: metadata.state.wire_tag(),
        segment: metadata
            .ensembles
            .iter()
            .map(|(first, bookies)| Segment {
                ensemble_member: bookies.clone(),
                first_entry_id: *first,
            })
            .collect(),
        digest_type: Some(metadata.digest_type.wire_tag()),
        password: Some(metadata.password.clone()),
        ack_quorum_size: Some(size_to_wire("ackQuorumSize", metadata.ack_quorum_size)?),
        ctime: Some(metadata.ctime),
        custom_metadata: metadata
            .custom_metadata
            .iter()
            .map(|(key, value)| CustomMetadataEntry {
                key: Some(key.clone()),
                value: Some(value.clone()),
            })
            .collect(),
        c_token: Some(metadata.creation_token),
    };

    let version = METADATA_FORMAT_VERSION.to_string();
    let body_len = record.encoded_len();
    let mut buf = BytesMut::with_capacity(
        VERSION_KEY.len() + version.len() + 1 + prost::length_delimiter_len(body_len) + body_len,
    );
    buf.put_slice(VERSION_KEY);
    buf.put_slice(version.as_bytes());
    buf.put_u8(LINE_SPLITTER);
    record.encode_length_delimited(&mut buf)?;
    Ok(buf.freeze())
}

/// Parse a metadata record read from the coordination store.
///
/// Absent optional fields decode to zero values; an absent digest type takes
/// the schema default (CRC32). Unknown enum tags are rejected.
pub fn parse_metadata(ledger_id: LedgerId, data: &[u8]) -> ProtocolResult<LedgerMetadata> {
    let mut rest = read_header(data)?;
    let record = LedgerMetadataFormat::decode_length_delimited(&mut rest)?;

    let digest_type = match record.digest_type {
        Some(tag) => DigestType::from_wire_tag(tag)
            .map_err(|_| ProtocolError::UnsupportedDigestType(tag))?,
        None => DigestType::Crc32,
    };
    let state = match record.state {
        0 => LedgerState::default(),
        tag => LedgerState::from_wire_tag(tag)
            .map_err(|e| ProtocolError::InvalidMetadata(e.to_string()))?,
    };

    let mut ensembles = BTreeMap::new();
    for segment in record.segment {
        if segment.first_entry_id < 0 {
            return Err(ProtocolError::InvalidMetadata(format!(
                "negative segment start {}",
                segment.first_entry_id
            )));
        }
        ensembles.insert(segment.first_entry_id, segment.ensemble_member);
    }

    let custom_metadata = record
        .custom_metadata
        .into_iter()
        .map(|entry| (entry.key.unwrap_or_default(), entry.value.unwrap_or_default()))
        .collect();

    Ok(LedgerMetadata {
        ledger_id,
        ensemble_size: size_from_wire("ensembleSize", record.ensemble_size)?,
        write_quorum_size: size_from_wire("quorumSize", record.quorum_size)?,
        ack_quorum_size: size_from_wire("ackQuorumSize", record.ack_quorum_size.unwrap_or(0))?,
        digest_type,
        password: record.password.unwrap_or_default(),
        state,
        creation_token: record.c_token.unwrap_or(0),
        last_entry_id: record.last_entry_id.unwrap_or(INVALID_ENTRY_ID),
        length: record.length,
        ctime: record.ctime.unwrap_or(0),
        custom_metadata,
        ensembles,
    })
}

/// Consume the `BookieMetadataFormatVersion\t<n>\n` line, returning the rest.
fn read_header(data: &[u8]) -> ProtocolResult<&[u8]> {
    let rest = data
        .strip_prefix(VERSION_KEY)
        .ok_or_else(|| ProtocolError::InvalidMetadataHeader("missing version key".into()))?;

    let newline = rest
        .iter()
        .take(MAX_VERSION_DIGITS + 1)
        .position(|b| *b == LINE_SPLITTER)
        .ok_or_else(|| {
            ProtocolError::InvalidMetadataHeader(format!(
                "no line break within {MAX_VERSION_DIGITS} version digits"
            ))
        })?;

    let digits = String::from_utf8_lossy(&rest[..newline]).into_owned();
    match digits.parse::<u32>() {
        Ok(METADATA_FORMAT_VERSION) => Ok(&rest[newline + 1..]),
        _ => Err(ProtocolError::UnsupportedMetadataVersion(digits)),
    }
}

fn size_to_wire(field: &str, value: u32) -> ProtocolResult<i32> {
    i32::try_from(value)
        .map_err(|_| ProtocolError::InvalidMetadata(format!("{field} {value} out of range")))
}

fn size_from_wire(field: &str, value: i32) -> ProtocolResult<u32> {
    u32::try_from(value)
        .map_err(|_| ProtocolError::InvalidMetadata(format!("negative {field}: {value}")))
}
