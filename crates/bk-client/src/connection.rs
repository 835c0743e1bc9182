//! Multiplexed bookie connections.
//!
//! A [`TcpBookieConnection`] carries many in-flight add requests over one
//! socket. Callers queue encoded frames for a per-connection write task, so
//! a caller that gives up never leaves half a frame on the wire; a detached
//! read loop routes each response back to its caller by transaction id. When
//! the socket fails every outstanding call is resolved with
//! [`ClientError::ConnectionLost`] and the connection reports itself closed
//! so the pool can replace it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bk_protocol::{BookieCodec, Request, Response, StatusCode};
use bk_types::{BookieAddr, EntryId, LedgerId};
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Source of transaction ids, shared by every connection of a pool.
#[derive(Debug, Default)]
pub struct TxnIdGenerator(AtomicU64);

impl TxnIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next id; the first one handed out is 1.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One logical channel to a bookie.
#[async_trait]
pub trait BookieConnection: Send + Sync {
    fn addr(&self) -> &str;

    /// Whether the channel is dead and must be replaced.
    fn is_closed(&self) -> bool;

    /// Send one entry frame and wait for the bookie's verdict.
    async fn add_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        master_key: Bytes,
        frame: Bytes,
    ) -> ClientResult<()>;
}

/// Dials new connections on behalf of the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        addr: &str,
        txn_ids: Arc<TxnIdGenerator>,
    ) -> ClientResult<Arc<dyn BookieConnection>>;
}

type CallResult = ClientResult<Response>;

/// Frames a connection buffers ahead of its write task.
const OUTBOUND_QUEUE: usize = 256;

/// Calls awaiting a response on one connection.
struct PendingCalls {
    addr: BookieAddr,
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    calls: HashMap<u64, oneshot::Sender<CallResult>>,
    /// Set once the connection has failed; never cleared.
    closed: Option<String>,
}

impl PendingCalls {
    fn new(addr: BookieAddr) -> Self {
        Self {
            addr,
            state: Mutex::new(PendingState::default()),
        }
    }

    fn register(&self, txn_id: u64) -> ClientResult<oneshot::Receiver<CallResult>> {
        let mut state = self.state.lock().expect("pending calls lock poisoned");
        if let Some(reason) = &state.closed {
            return Err(self.lost(reason));
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(txn_id, tx);
        Ok(rx)
    }

    /// Hand a response to its caller. Returns false if nobody is waiting.
    fn complete(&self, txn_id: u64, response: Response) -> bool {
        let sender = self
            .state
            .lock()
            .expect("pending calls lock poisoned")
            .calls
            .remove(&txn_id);
        match sender {
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    fn cancel(&self, txn_id: u64) {
        self.state
            .lock()
            .expect("pending calls lock poisoned")
            .calls
            .remove(&txn_id);
    }

    /// Mark the connection dead and fail every waiting call.
    fn close(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock().expect("pending calls lock poisoned");
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.calls.drain().map(|(_, tx)| tx).collect()
        };
        let failed = drained.len();
        for tx in drained {
            let _ = tx.send(Err(self.lost(reason)));
        }
        failed
    }

    fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("pending calls lock poisoned")
            .closed
            .is_some()
    }

    fn len(&self) -> usize {
        self.state.lock().expect("pending calls lock poisoned").calls.len()
    }

    fn lost(&self, reason: &str) -> ClientError {
        ClientError::ConnectionLost {
            addr: self.addr.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Removes a call from the pending table when its caller finishes or gives up.
struct Registration<'a> {
    pending: &'a PendingCalls,
    txn_id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.txn_id);
    }
}

/// A multiplexed TCP connection to one bookie.
pub struct TcpBookieConnection {
    addr: BookieAddr,
    outbound: mpsc::Sender<Bytes>,
    pending: Arc<PendingCalls>,
    txn_ids: Arc<TxnIdGenerator>,
    call_timeout: Duration,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl TcpBookieConnection {
    /// Dial `addr` and start the read loop.
    pub async fn connect(
        addr: &str,
        txn_ids: Arc<TxnIdGenerator>,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> ClientResult<Self> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::ConnectionLost {
                    addr: addr.to_string(),
                    reason: format!("connect failed: {e}"),
                })
            }
            Err(_) => {
                return Err(ClientError::Timeout {
                    addr: addr.to_string(),
                    timeout: connect_timeout,
                })
            }
        };
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(addr, stream, txn_ids, call_timeout))
    }

    /// Wrap an established stream. Must be called within a tokio runtime.
    ///
    /// A frame that cannot be written within `call_timeout` kills the
    /// connection.
    pub fn from_stream(
        addr: impl Into<BookieAddr>,
        stream: TcpStream,
        txn_ids: Arc<TxnIdGenerator>,
        call_timeout: Duration,
    ) -> Self {
        let addr = addr.into();
        let (reader, writer) = stream.into_split();
        let pending = Arc::new(PendingCalls::new(addr.clone()));
        let (outbound, queued) = mpsc::channel(OUTBOUND_QUEUE);
        let read_task = tokio::spawn(read_loop(BufReader::new(reader), Arc::clone(&pending)));
        let write_task = tokio::spawn(write_loop(
            writer,
            queued,
            Arc::clone(&pending),
            call_timeout,
        ));
        debug!(addr = %addr, "bookie connection established");
        Self {
            addr,
            outbound,
            pending,
            txn_ids,
            call_timeout,
            read_task,
            write_task,
        }
    }

    /// Number of calls still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Queue `frame` and wait for its response.
    ///
    /// Dropping this future before the frame is queued sends nothing; once
    /// queued, the write task puts the whole frame on the wire.
    async fn exchange(&self, txn_id: u64, frame: Bytes) -> CallResult {
        let rx = self.pending.register(txn_id)?;
        let _registered = Registration {
            pending: &self.pending,
            txn_id,
        };
        if self.outbound.send(frame).await.is_err() {
            return Err(self.pending.lost("writer stopped"));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.pending.lost("call abandoned")),
        }
    }
}

#[async_trait]
impl BookieConnection for TcpBookieConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    async fn add_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        master_key: Bytes,
        frame: Bytes,
    ) -> ClientResult<()> {
        let txn_id = self.txn_ids.next_id();
        let request = Request::add_entry(txn_id, ledger_id, entry_id, master_key, frame);
        let frame = BookieCodec::encode(&request)?;
        debug!(addr = %self.addr, txn_id, ledger_id, entry_id, "sending add request");

        let exchange = self.exchange(txn_id, frame);
        let response = match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                // The request stays on the wire; a late answer finds no caller.
                warn!(addr = %self.addr, txn_id, ledger_id, entry_id, "add request timed out");
                return Err(ClientError::Timeout {
                    addr: self.addr.clone(),
                    timeout: self.call_timeout,
                });
            }
        };
        add_status(&self.addr, ledger_id, entry_id, &response)
    }
}

impl Drop for TcpBookieConnection {
    fn drop(&mut self) {
        self.read_task.abort();
        self.write_task.abort();
        self.pending.close("connection dropped");
    }
}

impl fmt::Debug for TcpBookieConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpBookieConnection")
            .field("addr", &self.addr)
            .field("closed", &self.pending.is_closed())
            .field("in_flight", &self.pending.len())
            .finish()
    }
}

/// Map an add response onto the call's result.
fn add_status(
    addr: &str,
    ledger_id: LedgerId,
    entry_id: EntryId,
    response: &Response,
) -> ClientResult<()> {
    match response.add_outcome() {
        Ok(StatusCode::Eok) => Ok(()),
        Ok(StatusCode::Efenced) => Err(ClientError::Fenced { ledger_id }),
        Ok(status) => Err(ClientError::BookieError {
            addr: addr.to_string(),
            entry_id,
            status: status.name().to_string(),
        }),
        Err(bk_protocol::ProtocolError::UnknownStatusCode(code)) => Err(ClientError::BookieError {
            addr: addr.to_string(),
            entry_id,
            status: format!("status {code}"),
        }),
        Err(e) => Err(ClientError::ProtocolDecode {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
    }
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, pending: Arc<PendingCalls>) {
    let reason = loop {
        let body = match BookieCodec::read_frame(&mut reader).await {
            Ok(body) => body,
            Err(e) => break format!("read failed: {e}"),
        };
        let response: Response = match BookieCodec::decode_body(&body) {
            Ok(response) => response,
            Err(e) => break format!("undecodable response: {e}"),
        };
        let txn_id = response.txn_id();
        if !pending.complete(txn_id, response) {
            warn!(addr = %pending.addr, txn_id, "dropping response with no waiting call");
        }
    };
    let failed = pending.close(&reason);
    warn!(addr = %pending.addr, failed, reason = %reason, "bookie connection closed");
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::Receiver<Bytes>,
    pending: Arc<PendingCalls>,
    write_timeout: Duration,
) {
    let reason = loop {
        let Some(frame) = queued.recv().await else {
            return;
        };
        let written = tokio::time::timeout(write_timeout, async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break format!("write failed: {e}"),
            // Part of the frame may be on the wire; the stream is unusable.
            Err(_) => break format!("write stalled for {write_timeout:?}"),
        }
    };
    queued.close();
    let failed = pending.close(&reason);
    warn!(addr = %pending.addr, failed, reason = %reason, "bookie connection closed");
}

/// Dials real TCP connections.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.add_entry_timeout(), config.add_entry_timeout())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: &str,
        txn_ids: Arc<TxnIdGenerator>,
    ) -> ClientResult<Arc<dyn BookieConnection>> {
        let conn =
            TcpBookieConnection::connect(addr, txn_ids, self.connect_timeout, self.call_timeout)
                .await?;
        Ok(Arc::new(conn))
    }
}

/// Acknowledges every write without touching the network.
#[derive(Clone, Debug)]
pub struct NoopConnection {
    addr: BookieAddr,
}

impl NoopConnection {
    pub fn new(addr: impl Into<BookieAddr>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl BookieConnection for NoopConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn add_entry(
        &self,
        _ledger_id: LedgerId,
        _entry_id: EntryId,
        _master_key: Bytes,
        _frame: Bytes,
    ) -> ClientResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    async fn connect(
        &self,
        addr: &str,
        _txn_ids: Arc<TxnIdGenerator>,
    ) -> ClientResult<Arc<dyn BookieConnection>> {
        Ok(Arc::new(NoopConnection::new(addr)))
    }
}
