//! End-to-end host/client scenarios over loopback sockets.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parley_core::{
    ClientConfig, ClientSession, ConnectionState, EventSink, HostConfig, HostSession,
    SessionError, CHUNK_SIZE,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Chat { sender: String, text: String },
    State(ConnectionState),
    Progress { name: String, percent: u8 },
    Error(String),
    Video(Vec<u8>),
    FileReceived { name: String, data: Vec<u8> },
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn chats(&self) -> Vec<(String, String)> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Chat { sender, text } => Some((sender, text)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, wanted: &Event) -> usize {
        self.snapshot().iter().filter(|e| *e == wanted).count()
    }
}

impl EventSink for RecordingSink {
    fn on_chat(&self, sender: &str, text: &str) {
        self.events.lock().unwrap().push(Event::Chat {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }
    fn on_connection_state(&self, state: ConnectionState) {
        self.events.lock().unwrap().push(Event::State(state));
    }
    fn on_file_progress(&self, name: &str, percent: u8) {
        self.events.lock().unwrap().push(Event::Progress {
            name: name.to_string(),
            percent,
        });
    }
    fn on_connection_error(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(message.to_string()));
    }
    fn on_video_frame(&self, frame: Vec<u8>) {
        self.events.lock().unwrap().push(Event::Video(frame));
    }
    fn on_file_received(&self, name: &str, data: Vec<u8>) {
        self.events.lock().unwrap().push(Event::FileReceived {
            name: name.to_string(),
            data,
        });
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn loopback_config(name: &str) -> (HostConfig, ClientConfig) {
    let host = HostConfig {
        name: "host".to_string(),
        bind_addr: "127.0.0.1".parse().unwrap(),
        port: 0,
    };
    let client = ClientConfig {
        name: name.to_string(),
        retry_count: 3,
        retry_delay: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(5),
    };
    (host, client)
}

async fn start_host() -> (HostSession, Arc<RecordingSink>) {
    let (config, _) = loopback_config("");
    let sink = RecordingSink::new();
    let host = HostSession::start(config, sink.clone()).await.unwrap();
    (host, sink)
}

async fn join(host: &HostSession, name: &str) -> (ClientSession, Arc<RecordingSink>) {
    let (_, config) = loopback_config(name);
    let sink = RecordingSink::new();
    let client = ClientSession::connect(host.local_addr(), config, sink.clone())
        .await
        .unwrap();
    (client, sink)
}

#[tokio::test]
async fn chat_from_one_client_reaches_host_and_other_client_once() {
    let (host, host_sink) = start_host().await;
    let (client_a, sink_a) = join(&host, "A").await;
    let (_client_b, sink_b) = join(&host, "B").await;
    wait_until("both clients registered", || host.client_count() == 2).await;

    client_a.send_chat("hi").unwrap();

    wait_until("host sees the chat", || !host_sink.chats().is_empty()).await;
    wait_until("client B sees the chat", || !sink_b.chats().is_empty()).await;

    assert_eq!(host_sink.chats(), vec![("A".to_string(), "hi".to_string())]);
    assert_eq!(sink_b.chats(), vec![("A".to_string(), "hi".to_string())]);

    // No echo back to the sender: its sink never sees its own message.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sink_a.chats().is_empty());
    host.stop();
}

#[tokio::test]
async fn host_chat_reaches_every_client() {
    let (host, _host_sink) = start_host().await;
    let (_client_a, sink_a) = join(&host, "A").await;
    let (_client_b, sink_b) = join(&host, "B").await;
    wait_until("both clients registered", || host.client_count() == 2).await;

    host.send_chat("welcome").unwrap();

    wait_until("client A sees it", || !sink_a.chats().is_empty()).await;
    wait_until("client B sees it", || !sink_b.chats().is_empty()).await;
    assert_eq!(sink_a.chats(), vec![("host".to_string(), "welcome".to_string())]);
    assert_eq!(sink_b.chats(), vec![("host".to_string(), "welcome".to_string())]);
    host.stop();
}

#[tokio::test]
async fn joining_a_dead_port_retries_then_fails() {
    // Bind and immediately drop a listener so the port refuses connections.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = RecordingSink::new();
    let config = ClientConfig {
        name: "A".to_string(),
        retry_count: 3,
        retry_delay: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(1),
    };
    let started = Instant::now();
    let err = ClientSession::connect(dead_addr, config, sink.clone())
        .await
        .unwrap_err();

    match err {
        SessionError::ConnectFailed { attempts } => assert_eq!(attempts, 3),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    // Two pauses between the three attempts.
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(sink.count(&Event::State(ConnectionState::Connecting)), 1);
    assert_eq!(sink.count(&Event::State(ConnectionState::Disconnected)), 1);
}

#[tokio::test]
async fn host_that_never_confirms_counts_as_failed_attempts() {
    // A listener that accepts but never sends the handshake.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            match listener.accept().await {
                Ok((stream, _)) => held.push(stream),
                Err(_) => break,
            }
        }
    });

    let sink = RecordingSink::new();
    let config = ClientConfig {
        name: "A".to_string(),
        retry_count: 2,
        retry_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_millis(200),
    };
    let err = ClientSession::connect(addr, config, sink).await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailed { attempts: 2 }));
    silent.abort();
}

#[tokio::test]
async fn file_from_client_reassembles_on_host() {
    let (host, host_sink) = start_host().await;
    let (client_a, sink_a) = join(&host, "A").await;
    wait_until("client registered", || host.client_count() == 1).await;

    let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 123).map(|i| (i % 241) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    let name = file
        .path()
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    client_a.send_file(file.path().to_path_buf());

    wait_until("host received the file", || {
        host_sink
            .snapshot()
            .iter()
            .any(|e| matches!(e, Event::FileReceived { .. }))
    })
    .await;

    let received = host_sink
        .snapshot()
        .into_iter()
        .find_map(|e| match e {
            Event::FileReceived { name: n, data: d } => Some((n, d)),
            _ => None,
        })
        .unwrap();
    assert_eq!(received.0, name);
    assert_eq!(received.1, data);

    // Progress on both ends: non-decreasing, finishing at exactly 100 once.
    for sink in [&host_sink, &sink_a] {
        let percents: Vec<u8> = sink
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress { name: n, percent } if n == name => Some(percent),
                _ => None,
            })
            .collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.iter().filter(|&&p| p == 100).count(), 1);
        assert_eq!(*percents.last().unwrap(), 100);
    }
    host.stop();
}

#[tokio::test]
async fn file_from_host_fans_out_to_all_clients() {
    let (host, _host_sink) = start_host().await;
    let (_client_a, sink_a) = join(&host, "A").await;
    let (_client_b, sink_b) = join(&host, "B").await;
    wait_until("both clients registered", || host.client_count() == 2).await;

    let data = vec![0x5au8; CHUNK_SIZE + 7];
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    host.send_file(file.path().to_path_buf());

    for sink in [&sink_a, &sink_b] {
        wait_until("client received the file", || {
            sink.snapshot()
                .iter()
                .any(|e| matches!(e, Event::FileReceived { .. }))
        })
        .await;
        let received = sink
            .snapshot()
            .into_iter()
            .find_map(|e| match e {
                Event::FileReceived { data: d, .. } => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(received, data);
    }
    host.stop();
}

#[tokio::test]
async fn video_frames_relay_opaquely_and_skip_the_sender() {
    let (host, host_sink) = start_host().await;
    let (client_a, sink_a) = join(&host, "A").await;
    let (_client_b, sink_b) = join(&host, "B").await;
    wait_until("both clients registered", || host.client_count() == 2).await;

    let frame = vec![9u8; 1024];
    client_a.send_video_frame(frame.clone()).unwrap();

    wait_until("host got the frame", || {
        host_sink.count(&Event::Video(frame.clone())) == 1
    })
    .await;
    wait_until("client B got the frame", || {
        sink_b.count(&Event::Video(frame.clone())) == 1
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink_a.count(&Event::Video(frame.clone())), 0);
    host.stop();
}

#[tokio::test]
async fn host_stop_disconnects_clients_exactly_once() {
    let (host, _host_sink) = start_host().await;
    let (client_a, sink_a) = join(&host, "A").await;
    wait_until("client registered", || host.client_count() == 1).await;

    host.stop();

    wait_until("client saw the disconnect", || {
        sink_a.count(&Event::State(ConnectionState::Disconnected)) >= 1
    })
    .await;
    // A later explicit disconnect must not produce a second notification.
    client_a.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink_a.count(&Event::State(ConnectionState::Disconnected)), 1);
}

#[tokio::test]
async fn client_disconnect_unregisters_on_host() {
    let (host, _host_sink) = start_host().await;
    let (client_a, _sink_a) = join(&host, "A").await;
    wait_until("client registered", || host.client_count() == 1).await;

    client_a.disconnect();
    wait_until("host dropped the client", || host.client_count() == 0).await;
    host.stop();
}

fn addr_of(host: &HostSession) -> SocketAddr {
    host.local_addr()
}

#[tokio::test]
async fn second_session_can_reuse_the_stack_after_stop() {
    let (host, _sink) = start_host().await;
    let first = addr_of(&host);
    host.stop();

    let (host2, _sink2) = start_host().await;
    assert_ne!(first.port(), 0);
    let (_client, sink) = join(&host2, "A").await;
    assert_eq!(sink.count(&Event::State(ConnectionState::Connected)), 1);
    host2.stop();
}
