//! Entry digests for the bookie client.
//!
//! Every entry travels to the bookies as a frame
//! `[ledgerId][entryId][lastAddConfirmed][length][digest][payload]`. The
//! digest covers the 32-byte header and the payload, and its algorithm is
//! fixed per ledger by [`DigestType`](bk_types::DigestType).
//!
//! All algorithms wrap established libraries; there is no custom cryptography.

pub mod engine;
pub mod error;
pub mod packer;

pub use engine::{ledger_access_key, DigestEngine, ACCESS_KEY_LEN};
pub use error::{DigestError, DigestResult};
pub use packer::{EntryPacker, UnpackedEntry, ENTRY_HEADER_LEN};
