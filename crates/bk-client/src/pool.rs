use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use bk_types::{BookieAddr, LedgerId};
use rand::Rng;
use tracing::{debug, info};

use crate::connection::{BookieConnection, Connector, TxnIdGenerator};
use crate::error::ClientResult;

/// Fixed-size connection sets, one per bookie address.
///
/// Sets are built lazily on first use. Builders for an address serialize on
/// that address's async lock and re-check the map after acquiring it, so
/// concurrent first callers dial exactly one set while other addresses
/// proceed independently. Lookups of an existing set never touch the async
/// locks.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connections_per_bookie: usize,
    txn_ids: Arc<TxnIdGenerator>,
    sets: RwLock<HashMap<BookieAddr, Arc<ConnectionSet>>>,
    init_locks: Mutex<HashMap<BookieAddr, Arc<tokio::sync::Mutex<()>>>>,
}

struct ConnectionSet {
    slots: Vec<RwLock<Arc<dyn BookieConnection>>>,
}

impl ConnectionSet {
    fn get(&self, index: usize) -> Arc<dyn BookieConnection> {
        Arc::clone(&self.slots[index].read().expect("connection slot lock poisoned"))
    }

    fn replace(&self, index: usize, conn: Arc<dyn BookieConnection>) {
        *self.slots[index].write().expect("connection slot lock poisoned") = conn;
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, connections_per_bookie: usize) -> Self {
        Self {
            connector,
            connections_per_bookie: connections_per_bookie.max(1),
            txn_ids: Arc::new(TxnIdGenerator::new()),
            sets: RwLock::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
        }
    }

    /// A connection to `addr`, chosen uniformly from its set.
    ///
    /// `_ledger_id` is accepted for future ledger-affine selection and does
    /// not influence the choice today.
    pub async fn get_connection(
        &self,
        addr: &str,
        _ledger_id: LedgerId,
    ) -> ClientResult<Arc<dyn BookieConnection>> {
        let set = match self.lookup(addr) {
            Some(set) => set,
            None => self.build_set(addr).await?,
        };

        let index = rand::thread_rng().gen_range(0..set.slots.len());
        let conn = set.get(index);
        if !conn.is_closed() {
            return Ok(conn);
        }
        self.redial(addr, &set, index).await
    }

    /// Transaction ids handed to every dialed connection.
    pub fn txn_ids(&self) -> &Arc<TxnIdGenerator> {
        &self.txn_ids
    }

    pub fn connections_per_bookie(&self) -> usize {
        self.connections_per_bookie
    }

    /// Addresses with an established connection set.
    pub fn addresses(&self) -> Vec<BookieAddr> {
        let sets = self.sets.read().expect("connection pool lock poisoned");
        let mut addrs: Vec<BookieAddr> = sets.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    fn lookup(&self, addr: &str) -> Option<Arc<ConnectionSet>> {
        self.sets
            .read()
            .expect("connection pool lock poisoned")
            .get(addr)
            .cloned()
    }

    fn init_lock(&self, addr: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.init_locks.lock().expect("init locks poisoned");
        Arc::clone(locks.entry(addr.to_string()).or_default())
    }

    async fn build_set(&self, addr: &str) -> ClientResult<Arc<ConnectionSet>> {
        let lock = self.init_lock(addr);
        let _guard = lock.lock().await;
        if let Some(set) = self.lookup(addr) {
            return Ok(set);
        }

        // One failed dial abandons the whole set; the next caller starts over.
        let mut slots = Vec::with_capacity(self.connections_per_bookie);
        for _ in 0..self.connections_per_bookie {
            let conn = self.connector.connect(addr, Arc::clone(&self.txn_ids)).await?;
            slots.push(RwLock::new(conn));
        }

        let set = Arc::new(ConnectionSet { slots });
        self.sets
            .write()
            .expect("connection pool lock poisoned")
            .insert(addr.to_string(), Arc::clone(&set));
        info!(addr, connections = self.connections_per_bookie, "connection set created");
        Ok(set)
    }

    async fn redial(
        &self,
        addr: &str,
        set: &ConnectionSet,
        index: usize,
    ) -> ClientResult<Arc<dyn BookieConnection>> {
        let lock = self.init_lock(addr);
        let _guard = lock.lock().await;
        let current = set.get(index);
        if !current.is_closed() {
            return Ok(current);
        }
        let fresh = self.connector.connect(addr, Arc::clone(&self.txn_ids)).await?;
        set.replace(index, Arc::clone(&fresh));
        debug!(addr, slot = index, "re-dialed closed connection");
        Ok(fresh)
    }
}
