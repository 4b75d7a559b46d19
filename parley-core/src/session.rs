//! Host and client session lifecycle: accept loop, per-connection handlers,
//! connect-with-retry.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::event::{ConnectionState, EventSink};
use crate::protocol::{Message, CONNECTION_CONFIRMED, DEFAULT_PORT};
use crate::registry::{ClientHandle, ClientRegistry};
use crate::transfer::{self, IncomingTransfers, Outbound};
use crate::wire;

/// Host-side configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Display name attached to chat sent from this host.
    pub name: String,
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "host".to_string(),
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
        }
    }
}

/// Client-side configuration: the retry budget and the only timeout in the
/// system (established connections never time out).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Display name attached to chat sent from this client.
    pub name: String,
    /// Connection attempts before giving up.
    pub retry_count: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Budget per attempt, covering TCP connect plus the handshake wait.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "guest".to_string(),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A listening meeting session. Fans chat and video out to every client and
/// receives files addressed to the host.
pub struct HostSession {
    name: String,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    events: Arc<dyn EventSink>,
    accept_task: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl HostSession {
    /// Bind, listen, and start accepting clients. A failed bind aborts only
    /// this call; it is reported to the caller, never retried.
    pub async fn start(
        config: HostConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SessionError> {
        let listener = TcpListener::bind((config.bind_addr, config.port))
            .await
            .map_err(SessionError::Connection)?;
        let local_addr = listener.local_addr().map_err(SessionError::Connection)?;
        let registry = Arc::new(ClientRegistry::new());
        let stopped = Arc::new(AtomicBool::new(false));
        tracing::info!(%local_addr, "session open, accepting clients");
        events.on_connection_state(ConnectionState::Connected);

        let accept_task = tokio::spawn(run_accept_loop(
            listener,
            registry.clone(),
            events.clone(),
            stopped.clone(),
        ));
        Ok(Self {
            name: config.name,
            local_addr,
            registry,
            events,
            accept_task,
            stopped,
        })
    }

    /// The address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently registered clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Fan one chat line out to every client. Displaying the host's own
    /// message locally is the shell's job; the sink is not called for it.
    pub fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        let frame = wire::encode_frame(&Message::chat(&self.name, text))?;
        self.registry.broadcast(&frame, None, self.events.as_ref());
        Ok(())
    }

    /// Relay one opaque video frame to every client.
    pub fn send_video_frame(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        let encoded = wire::encode_frame(&Message::Video { frame })?;
        self.registry.broadcast(&encoded, None, self.events.as_ref());
        Ok(())
    }

    /// Send a file to every client on a dedicated task. Failures surface
    /// through the sink; the transfer is dropped, never resumed.
    pub fn send_file(&self, path: PathBuf) {
        spawn_send_task(
            path,
            Outbound::Broadcast(self.registry.clone()),
            self.events.clone(),
        );
    }

    /// Close the listening socket and every registered connection. Idempotent;
    /// the sink sees `Disconnected` once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.accept_task.abort();
        self.registry.stop();
        tracing::info!("session closed");
        self.events.on_connection_state(ConnectionState::Disconnected);
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    events: Arc<dyn EventSink>,
    stopped: Arc<AtomicBool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = registry.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(err) = accept_client(stream, addr, registry, events).await {
                        tracing::warn!(%addr, error = %err, "client discarded before registration");
                    }
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "listener failed");
                break;
            }
        }
    }
    // Unrecoverable listen error: tear the session down unless an explicit
    // stop already has.
    if !stopped.swap(true, Ordering::SeqCst) {
        registry.stop();
        events.on_connection_state(ConnectionState::Disconnected);
    }
}

/// Confirm a fresh connection, then register it and start its handler. The
/// handshake must land before the connection counts as registered; a failed
/// send discards the socket.
async fn accept_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    events: Arc<dyn EventSink>,
) -> Result<(), SessionError> {
    wire::write_frame(&mut stream, &Message::handshake()).await?;

    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(writer, rx));
    let handler = tokio::spawn(run_client_handler(reader, addr, registry.clone(), events));
    registry.add(
        addr,
        ClientHandle {
            frames: tx,
            reader: handler.abort_handle(),
        },
    );
    tracing::info!(%addr, "client connected");
    Ok(())
}

/// Drain pre-encoded frames into the socket. Exits when the channel closes or
/// a write fails; either way the write half drops and the connection closes.
async fn run_writer(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if writer.write_all(&frame).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

/// Per-client receive loop on the host. Chat and video fan out to the other
/// clients and the sink; file messages feed this connection's own transfer
/// state; system messages are ignored.
async fn run_client_handler(
    mut reader: OwnedReadHalf,
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    events: Arc<dyn EventSink>,
) {
    let mut transfers = IncomingTransfers::new();
    loop {
        let msg = match wire::read_frame(&mut reader).await {
            Ok(msg) => msg,
            Err(SessionError::ConnectionClosed) => break,
            Err(err) => {
                tracing::warn!(%addr, error = %err, "dropping client");
                break;
            }
        };
        // Re-encode once for fan-out before the message is torn apart.
        let relay = match &msg {
            Message::Chat { .. } | Message::Video { .. } => wire::encode_frame(&msg)
                .map_err(|err| tracing::warn!(error = %err, "relay encode failed"))
                .ok(),
            _ => None,
        };
        match msg {
            Message::Chat {
                content, sender, ..
            } => {
                if let Some(frame) = relay {
                    registry.broadcast(&frame, Some(addr), events.as_ref());
                }
                events.on_chat(&sender, &content);
            }
            Message::Video { frame } => {
                if let Some(encoded) = relay {
                    registry.broadcast(&encoded, Some(addr), events.as_ref());
                }
                events.on_video_frame(frame);
            }
            Message::FileInfo {
                transfer_id,
                name,
                size,
                digest,
            } => transfers.on_file_info(transfer_id, name, size, digest),
            Message::FileData { transfer_id, chunk } => {
                transfers.on_file_data(transfer_id, &chunk, events.as_ref())
            }
            Message::FileEnd {
                transfer_id,
                digest,
            } => {
                if let Err(err) = transfers.on_file_end(transfer_id, digest, events.as_ref()) {
                    events.on_connection_error(&err.to_string());
                }
            }
            Message::System { .. } => {}
        }
    }
    registry.remove(&addr);
    tracing::info!(%addr, "client disconnected");
}

/// A client's connection to a host: one receive loop, one writer task.
pub struct ClientSession {
    name: String,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    events: Arc<dyn EventSink>,
    recv_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    disconnected: Arc<AtomicBool>,
}

impl ClientSession {
    /// Join a session. Each attempt covers TCP connect plus the wait for the
    /// host's handshake; a missing or mismatched handshake counts as a failed
    /// attempt. Attempts are separated by the configured delay, and an
    /// exhausted budget surfaces `ConnectFailed` instead of retrying forever.
    pub async fn connect(
        addr: SocketAddr,
        config: ClientConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SessionError> {
        events.on_connection_state(ConnectionState::Connecting);
        let mut attempts = 0u32;
        let stream = loop {
            attempts += 1;
            match try_connect(addr, config.connect_timeout).await {
                Ok(stream) => break stream,
                Err(err) => {
                    tracing::warn!(%addr, attempt = attempts, error = %err, "connect attempt failed");
                    if attempts >= config.retry_count.max(1) {
                        events.on_connection_state(ConnectionState::Disconnected);
                        return Err(SessionError::ConnectFailed { attempts });
                    }
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        };
        tracing::info!(%addr, "joined session");
        events.on_connection_state(ConnectionState::Connected);

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(writer, rx));
        let disconnected = Arc::new(AtomicBool::new(false));
        let recv_task = tokio::spawn(run_server_receive(
            reader,
            events.clone(),
            disconnected.clone(),
        ));
        Ok(Self {
            name: config.name,
            frames: tx,
            events,
            recv_task,
            writer_task,
            disconnected,
        })
    }

    /// Send one chat line to the host, which fans it out to everyone else.
    /// Displaying the client's own message locally is the shell's job.
    pub fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        self.send_frame(wire::encode_frame(&Message::chat(&self.name, text))?)
    }

    /// Send one opaque video frame to the host for relay.
    pub fn send_video_frame(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        self.send_frame(wire::encode_frame(&Message::Video { frame })?)
    }

    /// Send a file to the host on a dedicated task. Failures surface through
    /// the sink; the transfer is dropped, never resumed.
    pub fn send_file(&self, path: PathBuf) {
        spawn_send_task(
            path,
            Outbound::Direct(self.frames.clone()),
            self.events.clone(),
        );
    }

    fn send_frame(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        self.frames
            .send(frame)
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Drop the connection. The sink sees `Disconnected` exactly once,
    /// whether the close came from here or from the receive loop observing a
    /// dead socket.
    pub fn disconnect(&self) {
        self.recv_task.abort();
        self.writer_task.abort();
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            tracing::info!("left session");
            self.events.on_connection_state(ConnectionState::Disconnected);
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("name", &self.name)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// One connect-and-handshake attempt. The TCP connect and the wait for the
/// host's confirmation each get the full budget.
async fn try_connect(addr: SocketAddr, budget: Duration) -> Result<TcpStream, SessionError> {
    let mut stream = match tokio::time::timeout(budget, TcpStream::connect(addr)).await {
        Ok(connected) => connected.map_err(SessionError::Connection)?,
        Err(_) => return Err(timed_out("connect timed out")),
    };
    match tokio::time::timeout(budget, wire::read_frame(&mut stream)).await {
        Ok(Ok(Message::System { content, .. })) if content == CONNECTION_CONFIRMED => Ok(stream),
        Ok(Ok(_)) => Err(SessionError::Protocol(
            "host did not confirm the connection".to_string(),
        )),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(timed_out("no handshake from host")),
    }
}

fn timed_out(what: &str) -> SessionError {
    SessionError::Connection(std::io::Error::new(std::io::ErrorKind::TimedOut, what))
}

/// The client's single receive loop. Loop exit means the connection is gone:
/// report `Disconnected` unless an explicit disconnect already did.
async fn run_server_receive(
    mut reader: OwnedReadHalf,
    events: Arc<dyn EventSink>,
    disconnected: Arc<AtomicBool>,
) {
    let mut transfers = IncomingTransfers::new();
    loop {
        let msg = match wire::read_frame(&mut reader).await {
            Ok(msg) => msg,
            Err(SessionError::ConnectionClosed) => break,
            Err(err) => {
                tracing::warn!(error = %err, "receive failed");
                break;
            }
        };
        match msg {
            Message::Chat {
                content, sender, ..
            } => events.on_chat(&sender, &content),
            Message::Video { frame } => events.on_video_frame(frame),
            Message::FileInfo {
                transfer_id,
                name,
                size,
                digest,
            } => transfers.on_file_info(transfer_id, name, size, digest),
            Message::FileData { transfer_id, chunk } => {
                transfers.on_file_data(transfer_id, &chunk, events.as_ref())
            }
            Message::FileEnd {
                transfer_id,
                digest,
            } => {
                if let Err(err) = transfers.on_file_end(transfer_id, digest, events.as_ref()) {
                    events.on_connection_error(&err.to_string());
                }
            }
            Message::System { .. } => {}
        }
    }
    if !disconnected.swap(true, Ordering::SeqCst) {
        tracing::info!("disconnected from session");
        events.on_connection_state(ConnectionState::Disconnected);
    }
}

/// Run a file send on its own task; failures are user-visible, never fatal to
/// the session.
fn spawn_send_task(path: PathBuf, outbound: Outbound, events: Arc<dyn EventSink>) {
    tokio::spawn(async move {
        if let Err(err) = transfer::send_file(&path, &outbound, events.as_ref()).await {
            tracing::warn!(path = %path.display(), error = %err, "file send failed");
            events.on_connection_error(&format!("file send failed: {err}"));
        }
    });
}
