use std::time::Duration;

use bk_types::DigestType;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

const ZK_SCHEME: &str = "zk";

/// Client-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Coordination service, e.g. `zk://h1:2181;h2:2181/ledgers`.
    pub metadata_service_uri: String,
    /// Session timeout towards the coordination service.
    pub zk_timeout_ms: u64,
    /// Connections kept open to each bookie.
    pub connections_per_bookie: usize,
    /// Per-call deadline for an add request.
    pub add_entry_timeout_ms: u64,
    /// Extra attempts per bookie after a timeout or lost connection.
    pub add_entry_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            metadata_service_uri: "zk://127.0.0.1:2181/ledgers".into(),
            zk_timeout_ms: 5_000,
            connections_per_bookie: 4,
            add_entry_timeout_ms: 5_000,
            add_entry_retries: 1,
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> ClientResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| ClientError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.connections_per_bookie == 0 {
            return Err(ClientError::Configuration(
                "connections_per_bookie must be greater than zero".into(),
            ));
        }
        if self.add_entry_timeout_ms == 0 {
            return Err(ClientError::Configuration(
                "add_entry_timeout_ms must be greater than zero".into(),
            ));
        }
        self.metadata_service()?;
        Ok(())
    }

    pub fn metadata_service(&self) -> ClientResult<MetadataServiceUri> {
        MetadataServiceUri::parse(&self.metadata_service_uri)
    }

    pub fn zk_timeout(&self) -> Duration {
        Duration::from_millis(self.zk_timeout_ms)
    }

    pub fn add_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.add_entry_timeout_ms)
    }
}

/// A parsed `zk://host1;host2/base/path` metadata service URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataServiceUri {
    pub hosts: Vec<String>,
    /// Root under which ledger metadata lives; empty for `/`.
    pub base_path: String,
}

impl MetadataServiceUri {
    pub fn parse(uri: &str) -> ClientResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ClientError::Configuration(format!("malformed service uri: {uri}")))?;
        if scheme != ZK_SCHEME {
            return Err(ClientError::Configuration(format!(
                "unsupported metadata service scheme: {scheme}"
            )));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let hosts: Vec<String> = authority
            .split(';')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();
        if hosts.is_empty() {
            return Err(ClientError::Configuration(format!(
                "no hosts in metadata service uri: {uri}"
            )));
        }

        let base_path = path.trim_end_matches('/').to_string();
        Ok(Self { hosts, base_path })
    }

    /// Hosts in the comma-separated form coordination clients connect with.
    pub fn connect_string(&self) -> String {
        self.hosts.join(",")
    }
}

/// Quorum sizing and integrity settings for a new ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub ensemble_size: u32,
    pub write_quorum_size: u32,
    pub ack_quorum_size: u32,
    pub digest_type: DigestType,
    #[serde(default)]
    pub password: Vec<u8>,
}

impl LedgerConfig {
    pub fn new(ensemble_size: u32, write_quorum_size: u32, ack_quorum_size: u32) -> Self {
        Self {
            ensemble_size,
            write_quorum_size,
            ack_quorum_size,
            digest_type: DigestType::Crc32c,
            password: Vec::new(),
        }
    }

    pub fn with_digest(mut self, digest_type: DigestType) -> Self {
        self.digest_type = digest_type;
        self
    }

    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = password.into();
        self
    }

    /// Requires `0 < ack <= write <= ensemble`.
    pub fn validate(&self) -> ClientResult<()> {
        if self.ensemble_size == 0 || self.write_quorum_size == 0 || self.ack_quorum_size == 0 {
            return Err(ClientError::Configuration(format!(
                "quorum sizes must be positive (ensemble {}, write {}, ack {})",
                self.ensemble_size, self.write_quorum_size, self.ack_quorum_size
            )));
        }
        if self.write_quorum_size > self.ensemble_size {
            return Err(ClientError::Configuration(format!(
                "write quorum {} exceeds ensemble size {}",
                self.write_quorum_size, self.ensemble_size
            )));
        }
        if self.ack_quorum_size > self.write_quorum_size {
            return Err(ClientError::Configuration(format!(
                "ack quorum {} exceeds write quorum {}",
                self.ack_quorum_size, self.write_quorum_size
            )));
        }
        Ok(())
    }
}
