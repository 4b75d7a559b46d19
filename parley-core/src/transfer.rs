//! Chunked file transfer: digest-checked send and receive.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::event::EventSink;
use crate::protocol::{new_transfer_id, Message, TransferId, CHUNK_SIZE};
use crate::registry::ClientRegistry;
use crate::wire;

/// Where a send task delivers its frames: fanned out through the host
/// registry, or straight down the client's server connection.
pub enum Outbound {
    Broadcast(Arc<ClientRegistry>),
    Direct(mpsc::UnboundedSender<Vec<u8>>),
}

impl Outbound {
    /// Broadcast delivery never fails the transfer (broken peers are pruned
    /// individually); direct delivery fails once the server connection is gone.
    fn send(&self, frame: Vec<u8>, events: &dyn EventSink) -> Result<(), SessionError> {
        match self {
            Outbound::Broadcast(registry) => {
                registry.broadcast(&frame, None, events);
                Ok(())
            }
            Outbound::Direct(tx) => tx.send(frame).map_err(|_| SessionError::ConnectionClosed),
        }
    }
}

/// Integer progress percentage. Zero-sized transfers count as complete.
pub fn progress_percent(bytes_moved: u64, size: u64) -> u8 {
    if size == 0 {
        100
    } else {
        ((bytes_moved.min(size) * 100) / size) as u8
    }
}

/// Hash a byte buffer. Accidental-corruption detection only, not a security
/// mechanism.
pub fn digest_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Streaming digest of a file, without loading it whole.
async fn digest_file(path: &Path) -> Result<[u8; 32], SessionError> {
    let mut file = File::open(path).await.map_err(SessionError::File)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(SessionError::File)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Send one file: `FileInfo`, fixed-size `FileData` chunks, `FileEnd`.
/// Progress is reported after every chunk, is non-decreasing, and reaches 100
/// exactly when the last byte has been handed to the transport. Any read or
/// send failure aborts the transfer; there is no resume.
pub async fn send_file(
    path: &Path,
    outbound: &Outbound,
    events: &dyn EventSink,
) -> Result<(), SessionError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    let size = tokio::fs::metadata(path)
        .await
        .map_err(SessionError::File)?
        .len();
    let digest = digest_file(path).await?;
    let transfer_id = new_transfer_id();
    tracing::info!(name = %name, size, "starting file send");

    let info = Message::FileInfo {
        transfer_id,
        name: name.clone(),
        size,
        digest,
    };
    outbound.send(wire::encode_frame(&info)?, events)?;

    let mut file = File::open(path).await.map_err(SessionError::File)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    while sent < size {
        let n = file.read(&mut buf).await.map_err(SessionError::File)?;
        if n == 0 {
            break;
        }
        let data = Message::FileData {
            transfer_id,
            chunk: buf[..n].to_vec(),
        };
        outbound.send(wire::encode_frame(&data)?, events)?;
        sent += n as u64;
        events.on_file_progress(&name, progress_percent(sent, size));
    }

    let end = Message::FileEnd {
        transfer_id,
        digest,
    };
    outbound.send(wire::encode_frame(&end)?, events)?;
    if size == 0 {
        events.on_file_progress(&name, 100);
    }
    tracing::info!(name = %name, "file send complete");
    Ok(())
}

/// One in-flight inbound transfer: metadata from `FileInfo` plus the
/// accumulation buffer. The buffer grows to the advertised size; nothing
/// caps it.
struct IncomingTransfer {
    name: String,
    size: u64,
    digest: [u8; 32],
    buf: Vec<u8>,
}

/// Inbound transfers for one connection, keyed by transfer id. Owned by that
/// connection's receive loop; transfers on different connections never share
/// state.
#[derive(Default)]
pub struct IncomingTransfers {
    active: HashMap<TransferId, IncomingTransfer>,
}

impl IncomingTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// `FileInfo`: open an accumulation buffer for the announced transfer.
    pub fn on_file_info(
        &mut self,
        transfer_id: TransferId,
        name: String,
        size: u64,
        digest: [u8; 32],
    ) {
        tracing::info!(name = %name, size, "incoming file transfer");
        self.active.insert(
            transfer_id,
            IncomingTransfer {
                name,
                size,
                digest,
                buf: Vec::new(),
            },
        );
    }

    /// `FileData`: append a chunk. Chunks for unknown ids are ignored, since
    /// a prior failure may already have discarded that transfer. Progress
    /// stays below 100 until the digest has been verified.
    pub fn on_file_data(&mut self, transfer_id: TransferId, chunk: &[u8], events: &dyn EventSink) {
        let Some(transfer) = self.active.get_mut(&transfer_id) else {
            return;
        };
        transfer.buf.extend_from_slice(chunk);
        let percent = progress_percent(transfer.buf.len() as u64, transfer.size).min(99);
        events.on_file_progress(&transfer.name, percent);
    }

    /// `FileEnd`: recompute the digest over the accumulated bytes and check
    /// it against both the announced and the closing digest. A match hands
    /// the data to the sink for saving and reports 100; a mismatch discards
    /// everything and fails with `Integrity`, with no save and no 100. Ends
    /// for unknown ids are ignored.
    pub fn on_file_end(
        &mut self,
        transfer_id: TransferId,
        digest: [u8; 32],
        events: &dyn EventSink,
    ) -> Result<(), SessionError> {
        let Some(transfer) = self.active.remove(&transfer_id) else {
            return Ok(());
        };
        let computed = digest_bytes(&transfer.buf);
        if computed != digest || computed != transfer.digest {
            tracing::warn!(name = %transfer.name, "digest mismatch, discarding transfer");
            return Err(SessionError::Integrity {
                name: transfer.name,
            });
        }
        events.on_file_progress(&transfer.name, 100);
        events.on_file_received(&transfer.name, transfer.buf);
        Ok(())
    }
}
