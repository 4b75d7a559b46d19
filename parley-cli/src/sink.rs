//! Terminal event sink: prints session events, saves verified files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use parley_core::{ConnectionState, EventSink};

pub struct TerminalSink {
    download_dir: PathBuf,
    /// Last printed progress step per transfer, to keep chunk-by-chunk
    /// updates from flooding the terminal.
    last_step: Mutex<HashMap<String, u8>>,
}

impl TerminalSink {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            last_step: Mutex::new(HashMap::new()),
        }
    }
}

impl EventSink for TerminalSink {
    fn on_chat(&self, sender: &str, text: &str) {
        println!("[{sender}] {text}");
    }

    fn on_connection_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => println!("* connecting..."),
            ConnectionState::Connected => println!("* connected"),
            ConnectionState::Disconnected => println!("* disconnected"),
        }
    }

    fn on_file_progress(&self, name: &str, percent: u8) {
        let step = percent / 10 * 10;
        let mut last = self.last_step.lock().expect("progress lock poisoned");
        if last.get(name) == Some(&step) {
            return;
        }
        last.insert(name.to_string(), step);
        if percent == 100 {
            last.remove(name);
        }
        println!("* {name}: {percent}%");
    }

    fn on_connection_error(&self, message: &str) {
        eprintln!("! {message}");
    }

    fn on_video_frame(&self, frame: Vec<u8>) {
        // No display surface in the terminal shell.
        tracing::trace!(len = frame.len(), "video frame dropped");
    }

    fn on_file_received(&self, name: &str, data: Vec<u8>) {
        // Only the final path component; a sender-supplied name must not
        // escape the download directory.
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "received.bin".into());
        let target = self.download_dir.join(file_name);
        let result = std::fs::create_dir_all(&self.download_dir)
            .and_then(|_| std::fs::write(&target, &data));
        match result {
            Ok(()) => println!("* saved {} ({} bytes)", target.display(), data.len()),
            Err(err) => eprintln!("! could not save {name}: {err}"),
        }
    }
}
