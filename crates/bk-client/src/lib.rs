//! Client for a bookie cluster.
//!
//! Appends flow through a [`LedgerHandle`]: the entry is framed with the
//! ledger's digest, fanned out concurrently to its ensemble over pooled,
//! multiplexed TCP connections, and confirmed once the ack quorum answers.
//! [`BookKeeper`] creates ledgers against a [`Coordinator`].

pub mod bookkeeper;
pub mod config;
pub mod connection;
pub mod coordination;
pub mod error;
pub mod lac;
pub mod ledger;
pub mod pool;

#[cfg(test)]
mod test_support;

pub use bookkeeper::BookKeeper;
pub use config::{ClientConfig, LedgerConfig, MetadataServiceUri};
pub use connection::{
    BookieConnection, Connector, NoopConnection, NoopConnector, TcpBookieConnection, TcpConnector,
    TxnIdGenerator,
};
pub use coordination::{Coordinator, InMemoryCoordinator};
pub use error::{ClientError, ClientResult};
pub use lac::ConfirmedTracker;
pub use ledger::{HandleState, LedgerHandle};
pub use pool::ConnectionPool;
