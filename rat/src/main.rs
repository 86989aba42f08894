//! Entry point for `rat`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rat::cli::{parse_address, parse_odd_port, parse_port};
use rat::{Connection, KeepalivePolicy, Listener, RatConfig, RatError};

const DEFAULT_MESSAGE: &str = "Make sure to drink your ovaltine.";
const RECV_BUFFER: usize = 4096;
const BACKLOG: usize = 16;

/// Reliable byte streams over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Segments per window round (1-255).
    #[arg(long, global = true, default_value_t = rat::config::RAT_DEFAULT_WINDOW)]
    window: usize,

    /// Wait per attempt before retransmitting, in milliseconds.
    #[arg(long, global = true, default_value_t = 4000)]
    reply_timeout_ms: u64,

    /// Attempts per reliable exchange.
    #[arg(long, global = true, default_value_t = rat::config::RAT_RETRY_TIMES)]
    retries: u32,

    /// Do not answer keep-alive probes.
    #[arg(long, global = true)]
    no_keepalives: bool,
}

impl Tuning {
    fn config(&self) -> anyhow::Result<RatConfig> {
        let config = RatConfig::default()
            .with_window_size(self.window)
            .with_reply_timeout(Duration::from_millis(self.reply_timeout_ms))
            .with_retry_times(self.retries)
            .with_keepalives(!self.no_keepalives);
        config.validate().context("invalid tuning")?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Listen for connections and print what each peer sends.
    Server {
        /// Local port to listen on (odd).
        #[arg(value_parser = parse_odd_port)]
        local_port: u16,
        /// Address of the network emulator in front of the peers.
        #[arg(value_parser = parse_address)]
        remote_address: Ipv4Addr,
        #[arg(value_parser = parse_port)]
        remote_port: u16,
    },
    /// Connect to a server, send one message and close.
    Client {
        #[arg(value_parser = parse_port)]
        local_port: u16,
        #[arg(value_parser = parse_address)]
        remote_address: Ipv4Addr,
        #[arg(value_parser = parse_port)]
        remote_port: u16,
        /// Text to send.
        #[arg(default_value = DEFAULT_MESSAGE)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config()?;

    match cli.mode {
        Mode::Server {
            local_port,
            remote_address,
            remote_port,
        } => {
            log::info!("Starting server on port {local_port} (emulator {remote_address}:{remote_port})");
            // A peer silent for a whole idle window is reset, freeing its stream.
            let config = config.with_keepalive_policy(KeepalivePolicy::Reset);
            serve(SocketAddr::from((Ipv4Addr::LOCALHOST, local_port)), config).await
        }
        Mode::Client {
            local_port,
            remote_address,
            remote_port,
            message,
        } => {
            let remote = SocketAddr::from((remote_address, remote_port));
            log::info!("Starting client, connecting to {remote}");
            send_once(local_port, remote, message.as_bytes(), config).await
        }
    }
}

async fn serve(addr: SocketAddr, config: RatConfig) -> anyhow::Result<()> {
    let mut listener = Listener::new(config)?;
    listener
        .listen(addr, BACKLOG)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    println!("<server> Now listening for connections...");

    let listener = Arc::new(listener);
    let cancel = listener.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted; shutting down");
            cancel.cancel();
        }
    });

    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(drain(conn));
            }
            Err(RatError::Cancelled) => return Ok(()),
            Err(e) => log::warn!("accept failed: {e}"),
        }
    }
}

/// Print everything `conn` receives until the peer closes, resets or goes
/// silent.
async fn drain(mut conn: Connection) {
    let stream = conn.stream_id();
    loop {
        match conn.recv(RECV_BUFFER).await {
            Ok(data) if data.is_empty() => {
                log::info!("stream {stream}: peer closed");
                return;
            }
            Ok(data) => println!("<stream {stream}> {}", String::from_utf8_lossy(&data)),
            Err(e) => {
                log::warn!("stream {stream}: {e}");
                return;
            }
        }
    }
}

async fn send_once(local_port: u16, remote: SocketAddr, message: &[u8], config: RatConfig) -> anyhow::Result<()> {
    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port));
    let mut conn = Connection::bind(local, config)
        .await
        .with_context(|| format!("cannot bind {local}"))?;
    conn.connect(remote)
        .await
        .with_context(|| format!("handshake with {remote} failed"))?;
    conn.send(message).await.context("transfer failed")?;
    conn.close().await.context("teardown failed")?;
    println!("<client> sent {} bytes", message.len());
    Ok(())
}
