//! LAN meeting session layer: length-prefixed framing, host/client
//! lifecycle, broadcast fan-out, and digest-checked file transfer.
//! Shells plug in through the `EventSink` capability interface and supply
//! raw frame bytes and file paths; video payloads stay opaque here.

pub mod error;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transfer;
pub mod wire;

pub use error::SessionError;
pub use event::{ConnectionState, EventSink};
pub use protocol::{Message, TransferId, CHUNK_SIZE, DEFAULT_PORT};
pub use session::{ClientConfig, ClientSession, HostConfig, HostSession};
pub use transfer::{IncomingTransfers, Outbound};
pub use wire::{decode_payload, encode_frame, read_frame, write_frame};
