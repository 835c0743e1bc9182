use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bk_protocol::{parse_metadata, serialize_metadata};
use bk_types::{LedgerId, LedgerMetadata};
use rand::Rng;
use tracing::info;

use crate::config::{ClientConfig, LedgerConfig};
use crate::connection::{Connector, TcpConnector};
use crate::coordination::Coordinator;
use crate::error::{ClientError, ClientResult};
use crate::ledger::LedgerHandle;
use crate::pool::ConnectionPool;

/// Entry point for creating ledgers.
///
/// Owns the connection pool shared by every handle it hands out.
pub struct BookKeeper {
    config: ClientConfig,
    coordinator: Arc<dyn Coordinator>,
    pool: Arc<ConnectionPool>,
}

impl BookKeeper {
    pub fn new(
        config: ClientConfig,
        coordinator: Arc<dyn Coordinator>,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool::new(connector, config.connections_per_bookie));
        Ok(Self {
            config,
            coordinator,
            pool,
        })
    }

    /// A client that talks to bookies over TCP.
    pub fn with_tcp(config: ClientConfig, coordinator: Arc<dyn Coordinator>) -> ClientResult<Self> {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::new(config, coordinator, connector)
    }

    /// Register a new ledger and return a handle open for appends.
    ///
    /// The ensemble is the first `ensemble_size` registered bookies.
    pub async fn create_ledger(&self, ledger: &LedgerConfig) -> ClientResult<LedgerHandle> {
        ledger.validate()?;

        let bookies = self.coordinator.list_bookies().await?;
        let required = ledger.ensemble_size as usize;
        if bookies.len() < required {
            return Err(ClientError::InsufficientBookies {
                required,
                available: bookies.len(),
            });
        }
        let ensemble = bookies.into_iter().take(required).collect();

        let ledger_id = self.coordinator.allocate_ledger_id().await?;
        let metadata = LedgerMetadata::new(
            ledger_id,
            ledger.ensemble_size,
            ledger.write_quorum_size,
            ledger.ack_quorum_size,
            ledger.digest_type,
            ledger.password.clone(),
            ensemble,
        )
        .with_creation_token(rand::thread_rng().gen_range(0..i64::MAX))
        .with_ctime(now_millis());

        let record = serialize_metadata(&metadata)?;
        self.coordinator.write_metadata(ledger_id, record).await?;
        info!(
            ledger_id,
            ensemble_size = ledger.ensemble_size,
            write_quorum = ledger.write_quorum_size,
            ack_quorum = ledger.ack_quorum_size,
            digest = %ledger.digest_type,
            "ledger created"
        );

        LedgerHandle::new(metadata, Arc::clone(&self.pool), self.config.add_entry_retries)
    }

    /// Fetch and parse the stored metadata of `ledger_id`.
    pub async fn read_ledger_metadata(&self, ledger_id: LedgerId) -> ClientResult<LedgerMetadata> {
        let data = self.coordinator.read_metadata(ledger_id).await?;
        Ok(parse_metadata(ledger_id, &data)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NoopConnector;
    use crate::coordination::InMemoryCoordinator;
    use crate::ledger::HandleState;
    use crate::test_support::{init_tracing, BookieBehavior, FakeBookie};
    use bk_types::{ledger_path, DigestType, LedgerState};

    fn client(coordinator: &Arc<InMemoryCoordinator>) -> BookKeeper {
        BookKeeper::new(
            ClientConfig::default(),
            Arc::clone(coordinator) as Arc<dyn Coordinator>,
            Arc::new(NoopConnector),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_ledger_stores_metadata() {
        let coordinator = Arc::new(InMemoryCoordinator::with_bookies([
            "b1:3181", "b2:3181", "readonly", "b3:3181", "b4:3181",
        ]));
        let bk = client(&coordinator);

        let config = LedgerConfig::new(3, 2, 2)
            .with_digest(DigestType::Hmac)
            .with_password(b"pw".to_vec());
        let handle = bk.create_ledger(&config).await.unwrap();
        assert_eq!(handle.state(), HandleState::Open);
        assert_eq!(handle.last_add_confirmed(), -1);

        let ledger_id = handle.ledger_id();
        assert_eq!(coordinator.metadata_paths(), vec![ledger_path(ledger_id).unwrap()]);

        let stored = bk.read_ledger_metadata(ledger_id).await.unwrap();
        assert_eq!(&stored, handle.metadata());
        assert_eq!(
            stored.current_ensemble().unwrap(),
            &["b1:3181".to_string(), "b2:3181".into(), "b3:3181".into()]
        );
        assert_eq!(stored.state, LedgerState::Open);
        assert!(stored.creation_token >= 0);
        assert!(stored.ctime > 0);
        assert_eq!(stored.password, b"pw");
    }

    #[tokio::test]
    async fn ledgers_get_distinct_ids() {
        let coordinator = Arc::new(InMemoryCoordinator::with_bookies(["b1:3181", "b2:3181"]));
        let bk = client(&coordinator);
        let config = LedgerConfig::new(2, 2, 1);
        let a = bk.create_ledger(&config).await.unwrap();
        let b = bk.create_ledger(&config).await.unwrap();
        assert_ne!(a.ledger_id(), b.ledger_id());
        assert_eq!(coordinator.metadata_paths().len(), 2);
    }

    #[tokio::test]
    async fn too_few_bookies() {
        let coordinator = Arc::new(InMemoryCoordinator::with_bookies(["b1:3181", "readonly"]));
        let bk = client(&coordinator);
        let err = bk.create_ledger(&LedgerConfig::new(2, 2, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InsufficientBookies { required: 2, available: 1 }
        ));
        assert!(coordinator.metadata_paths().is_empty());
    }

    #[tokio::test]
    async fn invalid_quorums_fail_before_io() {
        let coordinator = Arc::new(InMemoryCoordinator::with_bookies(["b1:3181"]));
        let bk = client(&coordinator);
        let err = bk.create_ledger(&LedgerConfig::new(1, 2, 1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        // No id was consumed.
        assert_eq!(coordinator.allocate_ledger_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_ledger_metadata() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let bk = client(&coordinator);
        assert!(matches!(
            bk.read_ledger_metadata(42).await,
            Err(ClientError::MetadataNotFound(42))
        ));
    }

    #[tokio::test]
    async fn stored_unknown_digest_is_unsupported() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        // Header, then a one-field record: digestType (field 7) = 17.
        let record = bytes::Bytes::from_static(b"BookieMetadataFormatVersion\t3\n\x02\x38\x11");
        coordinator.write_metadata(5, record).await.unwrap();

        let bk = client(&coordinator);
        assert!(matches!(
            bk.read_ledger_metadata(5).await,
            Err(ClientError::UnsupportedDigestType(17))
        ));
    }

    #[test]
    fn invalid_client_config_rejected() {
        let config = ClientConfig {
            connections_per_bookie: 0,
            ..Default::default()
        };
        let result = BookKeeper::new(
            config,
            Arc::new(InMemoryCoordinator::new()),
            Arc::new(NoopConnector),
        );
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[tokio::test]
    async fn create_and_append_over_tcp() {
        init_tracing();
        let bookies = [
            FakeBookie::start(BookieBehavior::Ack).await,
            FakeBookie::start(BookieBehavior::Ack).await,
            FakeBookie::start(BookieBehavior::Ack).await,
        ];
        let coordinator = Arc::new(InMemoryCoordinator::with_bookies(
            bookies.iter().map(FakeBookie::addr),
        ));
        let config = ClientConfig::from_toml_str(
            r#"
            connections_per_bookie = 2
            add_entry_timeout_ms = 2000
            "#,
        )
        .unwrap();
        let bk = BookKeeper::with_tcp(config, coordinator).unwrap();

        let handle = bk
            .create_ledger(&LedgerConfig::new(3, 2, 2).with_digest(DigestType::Crc32c))
            .await
            .unwrap();
        assert_eq!(handle.append("hello bookkeeper").await.unwrap(), 0);
        assert_eq!(handle.append("second").await.unwrap(), 1);
        assert_eq!(handle.last_add_confirmed(), 1);
        assert_eq!(bk.pool().addresses().len(), 3);
    }
}
