//! Entry point for the `rssi` demo binary.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing) and a trivial echo workload.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rssi::{RssiConfig, Session, UdpTransport};

/// Reliable windowed transport over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Listen for one peer and echo every payload back.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:8193).
        #[arg(short, long, default_value = "0.0.0.0:8193")]
        bind: SocketAddr,
    },
    /// Connect to a server and send a burst of numbered payloads.
    Client {
        /// Remote server address (e.g. 127.0.0.1:8193).
        #[arg(short, long)]
        server: SocketAddr,
        /// Number of payloads to send.
        #[arg(short, long, default_value_t = 16)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Server { bind } => {
            let transport = UdpTransport::bind(bind).await?;
            log::info!("serving on {}", transport.local_addr()?);
            let mut session = Session::server(transport, RssiConfig::default())?;
            loop {
                match session.recv().await {
                    Ok(payload) => {
                        log::info!("echoing {} bytes", payload.len());
                        if session.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            println!("{}", session.stats());
            session.close().await;
        }
        Mode::Client { server, count } => {
            let transport = UdpTransport::connect(server).await?;
            let mut session = Session::client(transport, RssiConfig::default())?;
            session.wait_open().await?;
            log::info!("connected to {server}");
            for i in 0..count {
                session.send(format!("payload {i}").into_bytes()).await?;
            }
            for _ in 0..count {
                let echo = session.recv_timeout(Duration::from_secs(5)).await?;
                log::info!("echo: {}", String::from_utf8_lossy(&echo));
            }
            println!("{}", session.stats());
            session.close().await;
        }
    }
    Ok(())
}
