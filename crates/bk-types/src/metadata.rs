use std::collections::BTreeMap;

use crate::error::TypeError;
use crate::ledger::{BookieAddr, DigestType, EntryId, LedgerId, LedgerState, INVALID_ENTRY_ID};

/// Identity and write parameters of one ledger.
///
/// `ensembles` maps the first entry id of each segment to the ordered list of
/// bookies serving it. A freshly created ledger has exactly one segment,
/// starting at entry `0`; later segments appear when the ledger is
/// re-ensembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerMetadata {
    pub ledger_id: LedgerId,
    pub ensemble_size: u32,
    pub write_quorum_size: u32,
    pub ack_quorum_size: u32,
    pub digest_type: DigestType,
    pub password: Vec<u8>,
    pub state: LedgerState,
    /// Random token identifying the metadata version that created the ledger.
    pub creation_token: i64,
    pub last_entry_id: EntryId,
    /// Total bytes written, as recorded when the ledger was closed.
    pub length: i64,
    /// Creation time, milliseconds since the UNIX epoch.
    pub ctime: i64,
    pub custom_metadata: BTreeMap<String, Vec<u8>>,
    pub ensembles: BTreeMap<EntryId, Vec<BookieAddr>>,
}

impl LedgerMetadata {
    /// Metadata for a new, open ledger whose single segment starts at entry 0.
    pub fn new(
        ledger_id: LedgerId,
        ensemble_size: u32,
        write_quorum_size: u32,
        ack_quorum_size: u32,
        digest_type: DigestType,
        password: Vec<u8>,
        ensemble: Vec<BookieAddr>,
    ) -> Self {
        let mut ensembles = BTreeMap::new();
        ensembles.insert(0, ensemble);
        Self {
            ledger_id,
            ensemble_size,
            write_quorum_size,
            ack_quorum_size,
            digest_type,
            password,
            state: LedgerState::Open,
            creation_token: 0,
            last_entry_id: INVALID_ENTRY_ID,
            length: 0,
            ctime: 0,
            custom_metadata: BTreeMap::new(),
            ensembles,
        }
    }

    pub fn with_creation_token(mut self, token: i64) -> Self {
        self.creation_token = token;
        self
    }

    pub fn with_ctime(mut self, ctime_ms: i64) -> Self {
        self.ctime = ctime_ms;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.custom_metadata.insert(key.into(), value.into());
        self
    }

    /// The ensemble responsible for `entry_id`: the segment with the greatest
    /// first-entry id that is `<= entry_id`.
    pub fn ensemble_for(&self, entry_id: EntryId) -> Option<&[BookieAddr]> {
        self.ensembles
            .range(..=entry_id)
            .next_back()
            .map(|(_, bookies)| bookies.as_slice())
    }

    /// The segment currently receiving new entries.
    pub fn current_ensemble(&self) -> Option<&[BookieAddr]> {
        self.ensembles.values().next_back().map(Vec::as_slice)
    }

    pub fn is_closed(&self) -> bool {
        self.state == LedgerState::Closed
    }

    /// Check quorum sizing and segment layout.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.ledger_id < 0 {
            return Err(TypeError::NegativeLedgerId(self.ledger_id));
        }
        if self.ack_quorum_size == 0 {
            return Err(TypeError::InvalidMetadata("ack quorum must be at least 1".into()));
        }
        if self.write_quorum_size > self.ensemble_size {
            return Err(TypeError::InvalidMetadata(format!(
                "write quorum {} exceeds ensemble size {}",
                self.write_quorum_size, self.ensemble_size
            )));
        }
        if self.ack_quorum_size > self.write_quorum_size {
            return Err(TypeError::InvalidMetadata(format!(
                "ack quorum {} exceeds write quorum {}",
                self.ack_quorum_size, self.write_quorum_size
            )));
        }

        let first = self
            .ensembles
            .keys()
            .next()
            .ok_or_else(|| TypeError::InvalidMetadata("no ensemble segments".into()))?;
        if *first != 0 {
            return Err(TypeError::InvalidMetadata(format!(
                "first segment starts at entry {first}, expected 0"
            )));
        }
        for (start, bookies) in &self.ensembles {
            if bookies.len() != self.ensemble_size as usize {
                return Err(TypeError::InvalidMetadata(format!(
                    "segment at entry {start} has {} bookies, ensemble size is {}",
                    bookies.len(),
                    self.ensemble_size
                )));
            }
        }
        Ok(())
    }
}
