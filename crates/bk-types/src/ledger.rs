use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Globally unique ledger identifier, assigned once by the coordination service.
pub type LedgerId = i64;

/// Position of an entry inside a ledger. The first entry is `0`.
pub type EntryId = i64;

/// Network address of a bookie, `host:port`.
pub type BookieAddr = String;

/// Sentinel for "no entry yet" in the pushed/confirmed counters.
pub const INVALID_ENTRY_ID: EntryId = -1;

/// Integrity code applied to every entry of a ledger.
///
/// Fixed at creation time. The wire tags match the metadata record schema
/// (`CRC32 = 1`, `HMAC = 2`, `CRC32C = 3`, `DUMMY = 4`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
    /// No digest; the frame carries only header and payload.
    None,
    /// CRC-32 (IEEE polynomial), widened to 8 bytes on the wire.
    Crc32,
    /// CRC-32C (Castagnoli polynomial), 4 bytes on the wire.
    Crc32c,
    /// HMAC-SHA1 keyed from the ledger password, 20 bytes on the wire.
    Hmac,
}

impl DigestType {
    /// Tag used for this digest type in the metadata record.
    pub const fn wire_tag(self) -> i32 {
        match self {
            Self::Crc32 => 1,
            Self::Hmac => 2,
            Self::Crc32c => 3,
            Self::None => 4,
        }
    }

    /// Decode a metadata-record tag.
    pub fn from_wire_tag(tag: i32) -> Result<Self, TypeError> {
        match tag {
            1 => Ok(Self::Crc32),
            2 => Ok(Self::Hmac),
            3 => Ok(Self::Crc32c),
            4 => Ok(Self::None),
            other => Err(TypeError::UnknownDigestType(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Crc32 => "crc32",
            Self::Crc32c => "crc32c",
            Self::Hmac => "hmac",
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state persisted in the ledger metadata record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerState {
    #[default]
    Open,
    InRecovery,
    Closed,
}

impl LedgerState {
    pub const fn wire_tag(self) -> i32 {
        match self {
            Self::Open => 1,
            Self::InRecovery => 2,
            Self::Closed => 3,
        }
    }

    pub fn from_wire_tag(tag: i32) -> Result<Self, TypeError> {
        match tag {
            1 => Ok(Self::Open),
            2 => Ok(Self::InRecovery),
            3 => Ok(Self::Closed),
            other => Err(TypeError::UnknownLedgerState(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_tags_roundtrip() {
        for dt in [DigestType::None, DigestType::Crc32, DigestType::Crc32c, DigestType::Hmac] {
            assert_eq!(DigestType::from_wire_tag(dt.wire_tag()).unwrap(), dt);
        }
    }

    #[test]
    fn unknown_digest_tag_rejected() {
        assert_eq!(
            DigestType::from_wire_tag(9).unwrap_err(),
            TypeError::UnknownDigestType(9)
        );
        assert!(DigestType::from_wire_tag(0).is_err());
    }

    #[test]
    fn state_tags_roundtrip() {
        for st in [LedgerState::Open, LedgerState::InRecovery, LedgerState::Closed] {
            assert_eq!(LedgerState::from_wire_tag(st.wire_tag()).unwrap(), st);
        }
        assert_eq!(
            LedgerState::from_wire_tag(7).unwrap_err(),
            TypeError::UnknownLedgerState(7)
        );
    }

    #[test]
    fn digest_display() {
        assert_eq!(DigestType::Crc32c.to_string(), "crc32c");
        assert_eq!(DigestType::None.to_string(), "none");
    }
}
