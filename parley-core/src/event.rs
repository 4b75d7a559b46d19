//! Capability interface the surrounding shell implements to observe a session.

/// Connection lifecycle as reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Events the session layer emits. Calls arrive on whichever task observed
/// the event; the shell is responsible for any UI-thread marshaling, and
/// implementations must not block.
pub trait EventSink: Send + Sync {
    /// A chat line arrived from `sender`.
    fn on_chat(&self, sender: &str, text: &str);

    /// The local session's connection state changed.
    fn on_connection_state(&self, state: ConnectionState);

    /// A file transfer, in either direction, advanced to `percent`.
    fn on_file_progress(&self, name: &str, percent: u8);

    /// A user-visible failure: a lost peer, or an aborted or corrupt transfer.
    fn on_connection_error(&self, message: &str);

    /// One video frame arrived. The payload is opaque to the session layer.
    fn on_video_frame(&self, frame: Vec<u8>);

    /// A transfer completed and verified; the shell decides where to save it.
    fn on_file_received(&self, name: &str, data: Vec<u8>) {
        let _ = (name, data);
    }
}
