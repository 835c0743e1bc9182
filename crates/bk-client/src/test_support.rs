//! In-process bookies and scripted connectors for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bk_protocol::{AddRequest, BookieCodec, Request, Response, StatusCode};
use bk_types::{BookieAddr, EntryId, LedgerId};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::connection::{BookieConnection, Connector, TxnIdGenerator};
use crate::error::{ClientError, ClientResult};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// An address nothing listens on.
pub(crate) async fn unreachable_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum BookieBehavior {
    Ack,
    Reply(StatusCode),
    /// Read requests, never answer.
    Silent,
    /// Close the socket after the first request.
    Hangup,
    /// Answer with bytes that do not decode as a response.
    Garbage,
    /// Leave the socket unread for a while, then acknowledge everything.
    StallThenAck(Duration),
}

/// A bookie speaking the wire protocol on a loopback port.
pub(crate) struct FakeBookie {
    addr: String,
    received: Arc<Mutex<Vec<AddRequest>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeBookie {
    pub(crate) async fn start(behavior: BookieBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, behavior, Arc::clone(&received)));
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            task,
        }
    }

    pub(crate) fn addr(&self) -> String {
        self.addr.clone()
    }

    pub(crate) fn received(&self) -> Vec<AddRequest> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBookie {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, behavior: BookieBehavior, received: Arc<Mutex<Vec<AddRequest>>>) {
    let (mut reader, mut writer) = stream.into_split();
    if let BookieBehavior::StallThenAck(delay) = behavior {
        tokio::time::sleep(delay).await;
    }
    loop {
        let Ok(body) = BookieCodec::read_frame(&mut reader).await else {
            return;
        };
        let Ok(request) = BookieCodec::decode_body::<Request>(&body) else {
            return;
        };
        let add = request.add_request.clone().unwrap_or_default();
        received.lock().unwrap().push(add.clone());

        let status = match behavior {
            BookieBehavior::Ack | BookieBehavior::StallThenAck(_) => StatusCode::Eok,
            BookieBehavior::Reply(status) => status,
            BookieBehavior::Silent => continue,
            BookieBehavior::Hangup => return,
            BookieBehavior::Garbage => {
                let _ = writer.write_all(&[0, 0, 0, 2, 0xFF, 0xFF]).await;
                continue;
            }
        };
        let response = Response::add_entry(request.txn_id(), status, add.ledger_id, add.entry_id);
        if BookieCodec::write_frame(&mut writer, &response).await.is_err() {
            return;
        }
    }
}

/// Per-address behavior of a [`ScriptedConnector`].
#[derive(Clone, Debug)]
pub(crate) enum Script {
    Ack,
    /// Every dial fails.
    Refuse,
    Reply(StatusCode),
    /// The call fails and the connection reports closed.
    Lost,
    /// Acknowledge after a delay.
    Delay(Duration),
    /// Delay only the given entry, acknowledge the rest at once.
    DelayEntry(EntryId, Duration),
    /// Answer the given entry with a status, acknowledge the rest.
    ReplyEntry(EntryId, StatusCode),
}

/// A [`Connector`] whose connections follow a per-address script.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: HashMap<BookieAddr, Script>,
    refuse_dials: AtomicUsize,
    dials: AtomicUsize,
    sent: Arc<Mutex<Vec<(BookieAddr, EntryId)>>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(mut self, addr: &str, script: Script) -> Self {
        self.scripts.insert(addr.to_string(), script);
        self
    }

    /// Fail the next `n` dials regardless of address.
    pub(crate) fn refuse_first(self, n: usize) -> Self {
        self.refuse_dials.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Every (address, entry id) an add was sent for, in send order.
    pub(crate) fn sent(&self) -> Vec<(BookieAddr, EntryId)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        addr: &str,
        _txn_ids: Arc<TxnIdGenerator>,
    ) -> ClientResult<Arc<dyn BookieConnection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_dials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let script = self.scripts.get(addr).cloned().unwrap_or(Script::Ack);
        if refused || matches!(script, Script::Refuse) {
            return Err(ClientError::ConnectionLost {
                addr: addr.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(Arc::new(ScriptedConnection {
            addr: addr.to_string(),
            script,
            closed: AtomicBool::new(false),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedConnection {
    addr: BookieAddr,
    script: Script,
    closed: AtomicBool,
    sent: Arc<Mutex<Vec<(BookieAddr, EntryId)>>>,
}

impl ScriptedConnection {
    fn reply(&self, ledger_id: LedgerId, entry_id: EntryId, status: StatusCode) -> ClientResult<()> {
        match status {
            StatusCode::Eok => Ok(()),
            StatusCode::Efenced => Err(ClientError::Fenced { ledger_id }),
            status => Err(ClientError::BookieError {
                addr: self.addr.clone(),
                entry_id,
                status: status.name().to_string(),
            }),
        }
    }
}

#[async_trait]
impl BookieConnection for ScriptedConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn add_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        _master_key: Bytes,
        _frame: Bytes,
    ) -> ClientResult<()> {
        self.sent.lock().unwrap().push((self.addr.clone(), entry_id));
        match &self.script {
            Script::Ack => Ok(()),
            Script::Reply(status) => self.reply(ledger_id, entry_id, *status),
            Script::ReplyEntry(target, status) if *target == entry_id => {
                self.reply(ledger_id, entry_id, *status)
            }
            Script::ReplyEntry(..) => Ok(()),
            Script::Refuse | Script::Lost => {
                self.closed.store(true, Ordering::SeqCst);
                Err(ClientError::ConnectionLost {
                    addr: self.addr.clone(),
                    reason: "scripted loss".into(),
                })
            }
            Script::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Script::DelayEntry(slow, delay) => {
                if *slow == entry_id {
                    tokio::time::sleep(*delay).await;
                }
                Ok(())
            }
        }
    }
}
