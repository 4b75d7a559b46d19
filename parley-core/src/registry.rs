//! Host-side registry of live client connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::event::EventSink;

/// One registered client: the channel feeding its writer task, plus the
/// handle used to stop its reader on session shutdown. Dropping the handle
/// closes the channel, which ends the writer task and the write half.
pub struct ClientHandle {
    pub frames: mpsc::UnboundedSender<Vec<u8>>,
    pub reader: AbortHandle,
}

/// The set of currently registered client connections. The accept loop
/// inserts; handler loops and failed broadcast deliveries remove. All access
/// goes through a single lock, never held across an await.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<SocketAddr, ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, ClientHandle>> {
        self.clients.lock().expect("client registry lock poisoned")
    }

    /// Register a connection.
    pub fn add(&self, addr: SocketAddr, handle: ClientHandle) {
        self.lock().insert(addr, handle);
    }

    /// Remove a connection if present. Removing an absent one is a no-op.
    pub fn remove(&self, addr: &SocketAddr) {
        self.lock().remove(addr);
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.lock().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver an already-encoded frame to every registered connection except
    /// `exclude`. Works on a point-in-time snapshot, so concurrent add/remove
    /// cannot tear the iteration. A failed delivery removes and closes only
    /// that connection and surfaces as a soft connection-lost event; the
    /// remaining peers always get the frame.
    pub fn broadcast(&self, frame: &[u8], exclude: Option<SocketAddr>, events: &dyn EventSink) {
        let snapshot: Vec<(SocketAddr, mpsc::UnboundedSender<Vec<u8>>)> = self
            .lock()
            .iter()
            .filter(|(addr, _)| Some(**addr) != exclude)
            .map(|(addr, handle)| (*addr, handle.frames.clone()))
            .collect();
        for (addr, tx) in snapshot {
            if tx.send(frame.to_vec()).is_err() {
                self.remove(&addr);
                tracing::warn!(%addr, "dropping client: connection lost during broadcast");
                events.on_connection_error(&format!("connection to {addr} lost"));
            }
        }
    }

    /// Close every registered connection: stop the readers, drop the writer
    /// channels.
    pub fn stop(&self) {
        let clients = std::mem::take(&mut *self.lock());
        for (addr, handle) in clients {
            handle.reader.abort();
            tracing::debug!(%addr, "closed client connection");
        }
    }
}
