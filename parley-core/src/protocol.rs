//! Session wire protocol: message types and constants.

use serde::{Deserialize, Serialize};

/// Default TCP port a host listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// File transfer chunk size in bytes.
pub const CHUNK_SIZE: usize = 8192;

/// Content of the system message a host sends on every freshly accepted
/// connection, before any other traffic. Clients treat anything else as a
/// failed handshake.
pub const CONNECTION_CONFIRMED: &str = "connection_confirmed";

/// Transfer id: 16 random bytes (UUIDv4). Never reused.
pub type TransferId = [u8; 16];

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Control traffic from the host, e.g. the connection handshake.
    System { content: String, timestamp: u64 },
    /// One chat line. The host fans it out to everyone but the sender.
    Chat {
        content: String,
        timestamp: u64,
        sender: String,
    },
    /// Announces a file transfer: display name, total size, SHA-256 digest.
    FileInfo {
        transfer_id: TransferId,
        name: String,
        size: u64,
        digest: [u8; 32],
    },
    /// One chunk of file payload.
    FileData {
        transfer_id: TransferId,
        chunk: Vec<u8>,
    },
    /// Ends a transfer; the receiver recomputes and checks the digest.
    FileEnd {
        transfer_id: TransferId,
        digest: [u8; 32],
    },
    /// One encoded video frame. Opaque to the session layer; relayed verbatim.
    Video { frame: Vec<u8> },
}

impl Message {
    /// The handshake message sent to every newly accepted connection.
    pub fn handshake() -> Self {
        Message::System {
            content: CONNECTION_CONFIRMED.to_string(),
            timestamp: unix_timestamp(),
        }
    }

    /// A chat message stamped with the current time.
    pub fn chat(sender: &str, content: &str) -> Self {
        Message::Chat {
            content: content.to_string(),
            timestamp: unix_timestamp(),
            sender: sender.to_string(),
        }
    }
}

/// Seconds since the Unix epoch. Shells format this for display.
pub fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a fresh transfer id.
pub fn new_transfer_id() -> TransferId {
    uuid::Uuid::new_v4().into_bytes()
}
