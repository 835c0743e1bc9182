//! Foundation types for the bookie client.
//!
//! Every other crate in the workspace depends on `bk-types`.
//!
//! # Key Types
//!
//! - [`LedgerMetadata`]: identity, quorum sizing and ensembles of one ledger
//! - [`DigestType`]: integrity code protecting each entry on the wire
//! - [`LedgerState`]: lifecycle state recorded in the metadata record
//! - [`ledger_path`]: coordination-store path derived from a ledger id

pub mod error;
pub mod ledger;
pub mod metadata;
pub mod path;

pub use error::TypeError;
pub use ledger::{BookieAddr, DigestType, EntryId, LedgerId, LedgerState, INVALID_ENTRY_ID};
pub use metadata::LedgerMetadata;
pub use path::{ledger_id_from_path, ledger_path};
