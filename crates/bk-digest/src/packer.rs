use bk_types::{EntryId, LedgerId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::engine::DigestEngine;
use crate::error::{DigestError, DigestResult};

/// `ledgerId`, `entryId`, `lastAddConfirmed` and `length`, 8 bytes each.
pub const ENTRY_HEADER_LEN: usize = 32;

/// Builds and checks the digest-protected frames of one ledger.
#[derive(Clone, Debug)]
pub struct EntryPacker {
    ledger_id: LedgerId,
    engine: DigestEngine,
}

/// Header fields and payload recovered from a verified frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnpackedEntry {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
    pub last_add_confirmed: EntryId,
    pub length: i64,
    pub payload: Bytes,
}

impl EntryPacker {
    pub fn new(ledger_id: LedgerId, engine: DigestEngine) -> Self {
        Self { ledger_id, engine }
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    pub fn engine(&self) -> &DigestEngine {
        &self.engine
    }

    /// Total frame size for a payload of `payload_len` bytes.
    pub fn frame_len(&self, payload_len: usize) -> usize {
        ENTRY_HEADER_LEN + self.engine.digest_len() + payload_len
    }

    /// Frame an entry for sending:
    ///
    /// ```text
    /// [ledgerId:8][entryId:8][lastAddConfirmed:8][length:8][digest][payload]
    /// ```
    ///
    /// All integers are big-endian; `length` is the ledger's cumulative byte
    /// count including this entry.
    pub fn package_for_sending(
        &self,
        entry_id: EntryId,
        last_add_confirmed: EntryId,
        length: i64,
        payload: &[u8],
    ) -> Bytes {
        let header = encode_header(self.ledger_id, entry_id, last_add_confirmed, length);

        let mut buf = BytesMut::with_capacity(self.frame_len(payload.len()));
        buf.put_slice(&header);
        self.engine.write_digest(&mut buf, &header, payload);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Split a frame back into its fields, verifying ledger id and digest.
    pub fn unpack(&self, frame: Bytes) -> DigestResult<UnpackedEntry> {
        let digest_len = self.engine.digest_len();
        let required = ENTRY_HEADER_LEN + digest_len;
        if frame.len() < required {
            return Err(DigestError::FrameTooShort {
                required,
                actual: frame.len(),
            });
        }

        let mut header = &frame[..ENTRY_HEADER_LEN];
        let ledger_id = header.get_i64();
        let entry_id = header.get_i64();
        let last_add_confirmed = header.get_i64();
        let length = header.get_i64();

        if ledger_id != self.ledger_id {
            return Err(DigestError::LedgerMismatch {
                expected: self.ledger_id,
                actual: ledger_id,
            });
        }

        let payload = frame.slice(required..);
        let digest = &frame[ENTRY_HEADER_LEN..required];
        if !self
            .engine
            .verify(&frame[..ENTRY_HEADER_LEN], &payload, digest)
        {
            return Err(DigestError::DigestMismatch { entry_id });
        }

        Ok(UnpackedEntry {
            ledger_id,
            entry_id,
            last_add_confirmed,
            length,
            payload,
        })
    }
}

fn encode_header(
    ledger_id: LedgerId,
    entry_id: EntryId,
    last_add_confirmed: EntryId,
    length: i64,
) -> [u8; ENTRY_HEADER_LEN] {
    let mut header = [0u8; ENTRY_HEADER_LEN];
    header[0..8].copy_from_slice(&ledger_id.to_be_bytes());
    header[8..16].copy_from_slice(&entry_id.to_be_bytes());
    header[16..24].copy_from_slice(&last_add_confirmed.to_be_bytes());
    header[24..32].copy_from_slice(&length.to_be_bytes());
    header
}
