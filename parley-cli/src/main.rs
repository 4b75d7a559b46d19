// Parley shell: terminal chat and file-transfer front end for a LAN meeting
// session. All protocol logic lives in parley-core; this binary wires a
// config file, a tracing subscriber, and a stdin loop to the session layer.

mod config;
mod sink;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::{ClientConfig, ClientSession, EventSink, HostConfig, HostSession};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage:
  parley host [port]        create a session and wait for participants
  parley join <ip> [port]   join a session on another machine";

enum Command {
    Host { port: u16 },
    Join { addr: SocketAddr },
}

enum Role {
    Host(HostSession),
    Client(ClientSession),
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("parley {VERSION}");
        return Ok(());
    }

    tracing_subscriber::fmt::init();
    let cfg = config::load();
    let command = parse_command(&args, &cfg)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(command, cfg))
}

fn parse_command(args: &[String], cfg: &config::Config) -> anyhow::Result<Command> {
    let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
    match args.as_slice() {
        ["host"] => Ok(Command::Host { port: cfg.port }),
        ["host", port] => Ok(Command::Host {
            port: port.parse().context("invalid port")?,
        }),
        ["join", ip] => Ok(Command::Join {
            addr: SocketAddr::new(ip.parse::<IpAddr>().context("invalid address")?, cfg.port),
        }),
        ["join", ip, port] => Ok(Command::Join {
            addr: SocketAddr::new(
                ip.parse::<IpAddr>().context("invalid address")?,
                port.parse().context("invalid port")?,
            ),
        }),
        _ => bail!("{USAGE}"),
    }
}

async fn run(command: Command, cfg: config::Config) -> anyhow::Result<()> {
    let sink: Arc<dyn EventSink> = Arc::new(sink::TerminalSink::new(cfg.download_dir.clone()));

    let role = match command {
        Command::Host { port } => {
            let host = HostSession::start(
                HostConfig {
                    name: cfg.name.clone(),
                    port,
                    ..HostConfig::default()
                },
                sink.clone(),
            )
            .await
            .context("could not create the session")?;
            println!("hosting on {}", host.local_addr());
            Role::Host(host)
        }
        Command::Join { addr } => {
            let client = ClientSession::connect(
                addr,
                ClientConfig {
                    name: cfg.name.clone(),
                    ..ClientConfig::default()
                },
                sink.clone(),
            )
            .await
            .context("could not join the session")?;
            Role::Client(client)
        }
    };

    println!("type to chat; /send <path> to send a file; /quit to leave");
    repl(role).await
}

/// Read stdin lines until quit or shutdown signal, dispatching chat and
/// commands into the session.
async fn repl(role: Role) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Some(path) = line.strip_prefix("/send ") {
                    let path = PathBuf::from(path.trim());
                    match &role {
                        Role::Host(host) => host.send_file(path),
                        Role::Client(client) => client.send_file(path),
                    }
                    continue;
                }
                if line == "/peers" {
                    if let Role::Host(host) = &role {
                        println!("* {} participant(s) connected", host.client_count());
                    }
                    continue;
                }
                let sent = match &role {
                    Role::Host(host) => host.send_chat(line),
                    Role::Client(client) => client.send_chat(line),
                };
                match sent {
                    Ok(()) => println!("[me] {line}"),
                    Err(err) => {
                        eprintln!("! could not send: {err}");
                        break;
                    }
                }
            }
        }
    }

    match role {
        Role::Host(host) => host.stop(),
        Role::Client(client) => client.disconnect(),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
