use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::peer::Peer;
use crate::resp::{self, Value};
use crate::store::Store;

/// Stable identity for an accepted connection, assigned at accept time.
/// Events reference peers by id so a command queued behind a disconnect can
/// never touch a stale transport.
pub type PeerId = u64;

/// Depth of the dispatch event queue. A busy engine backpressures peers on
/// `send`, one connection at a time; nothing is ever dropped.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Events funneled into the dispatch engine's single control loop. One
/// multiplexed queue keeps per-source arrival order; there is no ordering
/// guarantee across sources.
#[derive(Debug)]
pub enum Event {
    Connected {
        id: PeerId,
        addr: SocketAddr,
        writer: OwnedWriteHalf,
    },
    Disconnected {
        id: PeerId,
    },
    Request {
        id: PeerId,
        command: Command,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Fields appended to the `hello` map reply after the fixed
    /// `server: redis` entry.
    pub hello_fields: Vec<(String, String)>,
}

/// Cheap observer for a running server: live-connection count and a view of
/// the shared store. Safe to use from any task.
#[derive(Clone)]
pub struct ServerHandle {
    store: Arc<Store>,
    connections: Arc<AtomicUsize>,
}

impl ServerHandle {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// TCP key-value server: an accept loop plus a single dispatch task that
/// serializes every store operation and owns the live-connection set.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: Arc<Store>,
    connections: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            config,
            store: Arc::new(Store::new()),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            store: Arc::clone(&self.store),
            connections: Arc::clone(&self.connections),
        }
    }

    /// Serves until the given future resolves, then stops accepting, stops
    /// the dispatch engine, and closes every live connection.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            store,
            connections,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let engine = Engine::new(config, store, connections);
        let engine_task = tokio::spawn(engine.run(event_rx, shutdown_rx.clone()));

        tokio::pin!(shutdown);
        let mut next_peer_id: PeerId = 0;

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    let _ = shutdown_tx.send(true);
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            next_peer_id += 1;
                            if !admit_peer(next_peer_id, stream, addr, &event_tx, &shutdown_rx).await {
                                // Dispatch queue is gone; nothing left to serve.
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to accept connection"),
                    }
                }
            }
        }

        drop(event_tx);
        engine_task.await?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Registers the connection with the engine, then spawns its decode loop.
/// Admission goes through the queue before the spawn so the engine observes
/// the connection before any command decoded from it.
async fn admit_peer(
    id: PeerId,
    stream: TcpStream,
    addr: SocketAddr,
    events: &mpsc::Sender<Event>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    let (read_half, write_half) = stream.into_split();
    let admitted = events
        .send(Event::Connected {
            id,
            addr,
            writer: write_half,
        })
        .await
        .is_ok();
    if admitted {
        let peer = Peer::new(id, addr, read_half, events.clone(), shutdown.clone());
        tokio::spawn(peer.run());
    }
    admitted
}

struct PeerRecord {
    addr: SocketAddr,
    writer: OwnedWriteHalf,
}

/// The dispatch engine: single consumer of the event queue. All store
/// mutations and all reply writes happen here, so no two commands ever
/// execute interleaved and membership changes never race with iteration.
struct Engine {
    peers: HashMap<PeerId, PeerRecord>,
    store: Arc<Store>,
    connections: Arc<AtomicUsize>,
    hello_fields: Vec<(String, String)>,
}

impl Engine {
    fn new(config: ServerConfig, store: Arc<Store>, connections: Arc<AtomicUsize>) -> Self {
        let mut hello_fields = vec![("server".to_string(), "redis".to_string())];
        hello_fields.extend(config.hello_fields);
        Self {
            peers: HashMap::new(),
            store,
            connections,
            hello_fields,
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
        loop {
            select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        // Shutting down: drop every membership record, which closes the
        // write halves. Peer loops observe the same shutdown signal and
        // release their read halves on their own. Events still sitting in
        // the queue (including `Disconnected` announcements) are skipped;
        // the drain below supersedes them.
        for (id, record) in self.peers.drain() {
            debug!(peer = id, addr = %record.addr, "closing connection");
        }
        self.connections.store(0, Ordering::SeqCst);
        debug!("dispatch engine stopped");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { id, addr, writer } => {
                info!(peer = id, addr = %addr, "peer connected");
                self.peers.insert(id, PeerRecord { addr, writer });
                self.connections.store(self.peers.len(), Ordering::SeqCst);
            }
            Event::Disconnected { id } => {
                if let Some(record) = self.peers.remove(&id) {
                    info!(peer = id, addr = %record.addr, "peer disconnected");
                }
                self.connections.store(self.peers.len(), Ordering::SeqCst);
            }
            Event::Request { id, command } => {
                let reply = self.execute(&command);
                self.reply(id, &command, reply).await;
            }
        }
    }

    /// Runs one command against the store and builds its reply. Absent keys
    /// are not errors; they map to the nil/0 sentinel replies.
    fn execute(&self, command: &Command) -> Value {
        match command {
            Command::Hello(_) => Value::Map(
                self.hello_fields
                    .iter()
                    .map(|(key, value)| {
                        (Value::Simple(key.clone()), Value::Simple(value.clone()))
                    })
                    .collect(),
            ),
            Command::Client(_) => Value::Simple("OK".to_string()),
            Command::Set { key, value } => {
                self.store.set(key.clone(), value.clone());
                Value::Simple("OK".to_string())
            }
            Command::Get(key) => match self.store.get(key) {
                Some(value) => Value::Bulk(value),
                None => Value::Null,
            },
            Command::Del(key) => Value::Integer(i64::from(self.store.del(key))),
        }
    }

    /// Best-effort reply write. The peer may have been removed while the
    /// request sat in the queue, and the transport may fail mid-write;
    /// neither stops the engine.
    async fn reply(&mut self, id: PeerId, command: &Command, reply: Value) {
        let Some(record) = self.peers.get_mut(&id) else {
            debug!(
                peer = id,
                command = command.name(),
                "reply dropped, peer already closed",
            );
            return;
        };
        if let Err(err) = resp::write_value(&mut record.writer, &reply).await {
            warn!(
                peer = id,
                command = command.name(),
                error = %err,
                "failed to write reply",
            );
        } else {
            debug!(peer = id, command = command.name(), "reply sent");
        }
    }
}
