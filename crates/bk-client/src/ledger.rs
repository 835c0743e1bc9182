//! Ledger append pipeline.
//!
//! Each [`LedgerHandle::append`] allocates the next entry id, frames the
//! payload with the ledger's digest and writes it to every bookie of the
//! responsible ensemble at once. The call succeeds as soon as the ack quorum
//! has answered and fails as soon as the quorum can no longer be reached.
//! Any bookie reporting the ledger fenced moves the handle to
//! [`HandleState::Fenced`] for good. An entry that misses its quorum leaves a
//! hole the confirmed watermark can never cross, so it moves the handle to
//! [`HandleState::Errored`]: entries below the hole may still be confirmed,
//! everything else is refused.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use bk_digest::{ledger_access_key, DigestEngine, EntryPacker};
use bk_types::{BookieAddr, DigestType, EntryId, LedgerId, LedgerMetadata, INVALID_ENTRY_ID};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::lac::ConfirmedTracker;
use crate::pool::ConnectionPool;

/// Write-side lifecycle of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Open,
    /// Another writer has taken over; no further appends are possible.
    Fenced,
    Closed,
    /// An entry failed to reach its ack quorum.
    Errored,
}

/// Writer for one ledger.
///
/// Handles are shared between tasks behind an `Arc`; any number of appends
/// may be in flight at once.
pub struct LedgerHandle {
    metadata: LedgerMetadata,
    pool: Arc<ConnectionPool>,
    packer: EntryPacker,
    access_key: Bytes,
    add_entry_retries: u32,
    push: Mutex<PushState>,
    confirmed: ConfirmedTracker,
    lifecycle: Mutex<Lifecycle>,
}

struct PushState {
    last_add_pushed: EntryId,
    length: i64,
}

struct Lifecycle {
    state: HandleState,
    /// Lowest entry id that missed its quorum, once `Errored`.
    failed_entry: EntryId,
}

impl Lifecycle {
    fn check(&self, ledger_id: LedgerId) -> ClientResult<()> {
        match self.state {
            HandleState::Open => Ok(()),
            HandleState::Fenced => Err(ClientError::Fenced { ledger_id }),
            HandleState::Closed => Err(ClientError::LedgerClosed(ledger_id)),
            HandleState::Errored => Err(ClientError::LedgerErrored {
                ledger_id,
                entry_id: self.failed_entry,
            }),
        }
    }
}

impl LedgerHandle {
    pub fn new(
        metadata: LedgerMetadata,
        pool: Arc<ConnectionPool>,
        add_entry_retries: u32,
    ) -> ClientResult<Self> {
        metadata.validate()?;
        let engine = DigestEngine::new(metadata.digest_type, &metadata.password)?;
        let access_key = Bytes::copy_from_slice(&ledger_access_key(&metadata.password));
        let state = if metadata.is_closed() {
            HandleState::Closed
        } else {
            HandleState::Open
        };

        Ok(Self {
            packer: EntryPacker::new(metadata.ledger_id, engine),
            access_key,
            add_entry_retries,
            push: Mutex::new(PushState {
                last_add_pushed: metadata.last_entry_id,
                length: metadata.length,
            }),
            confirmed: ConfirmedTracker::new(metadata.last_entry_id),
            lifecycle: Mutex::new(Lifecycle {
                state,
                failed_entry: INVALID_ENTRY_ID,
            }),
            metadata,
            pool,
        })
    }

    /// Append one entry, returning its id once the ack quorum has it.
    ///
    /// An append that reaches its quorum after the handle stopped accepting
    /// appends reports the handle's error unless its id lies below the first
    /// failed entry.
    pub async fn append(&self, payload: impl Into<Bytes>) -> ClientResult<EntryId> {
        let payload = payload.into();
        let ledger_id = self.ledger_id();

        let (entry_id, length) = self.allocate(payload.len())?;
        let lac = self.confirmed.last_add_confirmed();
        let frame = self.packer.package_for_sending(entry_id, lac, length, &payload);
        debug!(ledger_id, entry_id, lac, length, frame_len = frame.len(), "appending entry");

        let result = match self.metadata.ensemble_for(entry_id) {
            Some(ensemble) => self.replicate(entry_id, frame, ensemble).await,
            None => Err(ClientError::NoEnsemble(entry_id)),
        };
        match result {
            Ok(()) => self.confirm(entry_id),
            Err(err) => {
                if matches!(err, ClientError::Fenced { .. }) {
                    self.fence();
                } else {
                    self.mark_failed(entry_id);
                }
                warn!(ledger_id, entry_id, error = %err, "append failed");
                Err(err)
            }
        }
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.metadata.ledger_id
    }

    pub fn metadata(&self) -> &LedgerMetadata {
        &self.metadata
    }

    pub fn digest_type(&self) -> DigestType {
        self.metadata.digest_type
    }

    pub fn state(&self) -> HandleState {
        self.lifecycle.lock().expect("ledger state lock poisoned").state
    }

    /// Highest entry id handed out so far.
    pub fn last_add_pushed(&self) -> EntryId {
        self.push.lock().expect("push state lock poisoned").last_add_pushed
    }

    /// Highest id below which every entry has reached its ack quorum.
    pub fn last_add_confirmed(&self) -> EntryId {
        self.confirmed.last_add_confirmed()
    }

    /// Cumulative payload bytes of all entries handed out so far.
    pub fn length(&self) -> i64 {
        self.push.lock().expect("push state lock poisoned").length
    }

    fn allocate(&self, payload_len: usize) -> ClientResult<(EntryId, i64)> {
        let lifecycle = self.lifecycle.lock().expect("ledger state lock poisoned");
        lifecycle.check(self.ledger_id())?;
        let mut push = self.push.lock().expect("push state lock poisoned");
        push.last_add_pushed += 1;
        push.length += payload_len as i64;
        Ok((push.last_add_pushed, push.length))
    }

    /// Advance the watermark for an entry that reached its quorum.
    fn confirm(&self, entry_id: EntryId) -> ClientResult<EntryId> {
        let ledger_id = self.ledger_id();
        let lifecycle = self.lifecycle.lock().expect("ledger state lock poisoned");
        let below_hole =
            lifecycle.state == HandleState::Errored && entry_id < lifecycle.failed_entry;
        if !below_hole {
            if let Err(err) = lifecycle.check(ledger_id) {
                debug!(ledger_id, entry_id, error = %err, "acknowledged entry left unconfirmed");
                return Err(err);
            }
        }
        // Completed under the lifecycle lock so no entry confirms after a fence.
        let lac = self.confirmed.complete(entry_id);
        drop(lifecycle);
        debug!(ledger_id, entry_id, lac, "entry confirmed");
        Ok(entry_id)
    }

    fn fence(&self) {
        let mut lifecycle = self.lifecycle.lock().expect("ledger state lock poisoned");
        if matches!(lifecycle.state, HandleState::Open | HandleState::Errored) {
            lifecycle.state = HandleState::Fenced;
            warn!(ledger_id = self.ledger_id(), "ledger fenced by another writer");
        }
    }

    fn mark_failed(&self, entry_id: EntryId) {
        let mut lifecycle = self.lifecycle.lock().expect("ledger state lock poisoned");
        match lifecycle.state {
            HandleState::Open => {
                lifecycle.state = HandleState::Errored;
                lifecycle.failed_entry = entry_id;
                warn!(
                    ledger_id = self.ledger_id(),
                    entry_id, "ledger handle stopped accepting appends"
                );
            }
            HandleState::Errored => {
                lifecycle.failed_entry = lifecycle.failed_entry.min(entry_id);
            }
            HandleState::Fenced | HandleState::Closed => {}
        }
    }

    /// Write `frame` to every bookie of `ensemble` and wait for the verdict.
    async fn replicate(
        &self,
        entry_id: EntryId,
        frame: Bytes,
        ensemble: &[BookieAddr],
    ) -> ClientResult<()> {
        let mut tally = QuorumTally::new(
            entry_id,
            self.metadata.ack_quorum_size as usize,
            ensemble.len(),
        );
        let mut calls: FuturesUnordered<_> = ensemble
            .iter()
            .map(|addr| {
                let frame = frame.clone();
                async move { (addr, self.send_to_bookie(addr, entry_id, frame).await) }
            })
            .collect();

        // Returning drops the remaining calls; their answers are ignored.
        while let Some((addr, result)) = calls.next().await {
            match result {
                Ok(()) => {
                    debug!(ledger_id = self.ledger_id(), entry_id, addr = %addr, "bookie acknowledged");
                    if tally.ack(addr) {
                        return Ok(());
                    }
                }
                Err(err @ ClientError::Fenced { .. }) => return Err(err),
                Err(err) => {
                    warn!(ledger_id = self.ledger_id(), entry_id, addr = %addr, error = %err, "bookie write failed");
                    tally.fail(addr, &err);
                    if !tally.reachable() {
                        return Err(tally.into_error());
                    }
                }
            }
        }
        Err(tally.into_error())
    }

    /// One bookie's part of the fan-out, re-sending on transient failures.
    async fn send_to_bookie(&self, addr: &str, entry_id: EntryId, frame: Bytes) -> ClientResult<()> {
        let ledger_id = self.ledger_id();
        let mut attempt = 0;
        loop {
            let result = match self.pool.get_connection(addr, ledger_id).await {
                Ok(conn) => {
                    conn.add_entry(ledger_id, entry_id, self.access_key.clone(), frame.clone())
                        .await
                }
                Err(err) => Err(err),
            };
            match result {
                Err(err) if err.is_retryable() && attempt < self.add_entry_retries => {
                    attempt += 1;
                    debug!(ledger_id, entry_id, addr, attempt, error = %err, "retrying add");
                }
                other => return other,
            }
        }
    }
}

impl fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("ledger_id", &self.ledger_id())
            .field("state", &self.state())
            .field("last_add_pushed", &self.last_add_pushed())
            .field("last_add_confirmed", &self.last_add_confirmed())
            .finish()
    }
}

/// Acknowledgements and failures collected for one entry.
struct QuorumTally {
    entry_id: EntryId,
    required: usize,
    outstanding: usize,
    acked: HashSet<BookieAddr>,
    failures: Vec<String>,
    all_transient: bool,
}

impl QuorumTally {
    fn new(entry_id: EntryId, required: usize, outstanding: usize) -> Self {
        Self {
            entry_id,
            required,
            outstanding,
            acked: HashSet::new(),
            failures: Vec::new(),
            all_transient: true,
        }
    }

    /// Count an acknowledgement; true once the quorum is met.
    fn ack(&mut self, addr: &str) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.acked.insert(addr.to_string());
        self.acked.len() >= self.required
    }

    fn fail(&mut self, addr: &str, err: &ClientError) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.all_transient &= err.is_retryable();
        self.failures.push(format!("{addr}: {err}"));
    }

    /// Whether the outstanding calls could still complete the quorum.
    fn reachable(&self) -> bool {
        self.acked.len() + self.outstanding >= self.required
    }

    fn into_error(self) -> ClientError {
        ClientError::QuorumNotReached {
            entry_id: self.entry_id,
            acked: self.acked.len(),
            required: self.required,
            failures: self.failures,
            transient: self.all_transient,
        }
    }
}
