use std::io;
use std::net::SocketAddr;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::command::Command;
use crate::resp;
use crate::server::{Event, PeerId};

/// Decode loop for one accepted connection.
///
/// The peer exclusively owns the read half of the socket; the write half
/// lives in the dispatch engine's membership record, and the engine writes
/// every reply. The peer only translates wire values into commands,
/// forwards them tagged with its id, and announces its own termination.
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        read_half: OwnedReadHalf,
        events: mpsc::Sender<Event>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            addr,
            reader: BufReader::new(read_half),
            events,
            shutdown,
        }
    }

    /// Runs the decode loop until EOF, a transport error, or shutdown.
    ///
    /// Malformed input never ends the loop: framing garbage and unknown or
    /// wrong-arity commands are logged and dropped while the connection
    /// stays open.
    pub async fn run(mut self) {
        loop {
            select! {
                _ = self.shutdown.changed() => {
                    debug!(peer = self.id, "peer loop stopped by shutdown");
                    break;
                }
                decoded = resp::read_value(&mut self.reader) => {
                    match decoded {
                        Ok(Some(value)) => {
                            if !self.forward(value).await {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(peer = self.id, addr = %self.addr, "client disconnected");
                            self.announce_closed().await;
                            break;
                        }
                        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                            // The decoder resynced past the bad input.
                            warn!(
                                peer = self.id,
                                addr = %self.addr,
                                error = %err,
                                "protocol error, request dropped",
                            );
                        }
                        Err(err) => {
                            warn!(
                                peer = self.id,
                                addr = %self.addr,
                                error = %err,
                                "read error, closing connection",
                            );
                            self.announce_closed().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Returns false once the dispatch queue is gone and the loop should stop.
    async fn forward(&mut self, value: resp::Value) -> bool {
        let command = match Command::from_value(value) {
            Ok(command) => command,
            Err(err) => {
                warn!(
                    peer = self.id,
                    addr = %self.addr,
                    error = %err,
                    "malformed request dropped",
                );
                return true;
            }
        };

        // The queue is bounded: when the engine falls behind, this send
        // suspends and throttles exactly this connection.
        self.events
            .send(Event::Request {
                id: self.id,
                command,
            })
            .await
            .is_ok()
    }

    async fn announce_closed(&self) {
        // Best effort: during shutdown the engine may already be gone.
        let _ = self.events.send(Event::Disconnected { id: self.id }).await;
    }
}
