//! clich - terminal client for the relay hub
//!
//! Connects to a `clichd` daemon, sends the identity handshake, then sends
//! every stdin line as a frame and prints every relayed frame to stdout.
//!
//! # Usage
//!
//! ```bash
//! clich --id alice --name "Alice"
//! clich --id alice --token s3cret --server 10.0.0.5:7878
//! ```

use std::env;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use clich_core::ClientIdentity;
use clich_protocol::{read_frame, write_frame, Handshake, MAX_FRAME_SIZE};
use clichd::config::{DEFAULT_LISTEN_ADDR, LISTEN_ENV};

/// clich - chat with everyone connected to a clich hub
#[derive(Parser, Debug)]
#[command(name = "clich", version, about)]
struct Args {
    /// Hub address (default: $CLICH_LISTEN or 127.0.0.1:7878)
    #[arg(short, long)]
    server: Option<String>,

    /// Identity id sent in the handshake
    #[arg(long)]
    id: String,

    /// Display name (defaults to the id)
    #[arg(short, long)]
    name: Option<String>,

    /// Bearer credential for hubs that verify admissions
    #[arg(short, long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("clich=warn".parse()?))
        .init();

    let args = Args::parse();
    let server = args
        .server
        .clone()
        .or_else(|| env::var(LISTEN_ENV).ok())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

    let stream = TcpStream::connect(&server)
        .await
        .with_context(|| format!("Failed to connect to {server}"))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let name = args.name.clone().unwrap_or_else(|| args.id.clone());
    let mut handshake = Handshake::new(ClientIdentity::new(args.id.clone(), name));
    if let Some(token) = args.token.clone() {
        handshake = handshake.with_token(token);
    }
    let line = handshake.encode().context("Failed to encode handshake")?;
    write_frame(&mut writer, &line)
        .await
        .context("Failed to send handshake")?;
    debug!(server = %server, id = %args.id, "Handshake sent");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            frame = read_frame(&mut reader, MAX_FRAME_SIZE) => {
                match frame.context("Connection error")? {
                    Some(frame) => {
                        stdout.write_all(&frame).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                    None => {
                        eprintln!("Disconnected from {server}");
                        return Ok(());
                    }
                }
            }

            line = stdin.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => write_frame(&mut writer, line.as_bytes())
                        .await
                        .context("Failed to send frame")?,
                    None => {
                        // stdin closed: stop sending, let the hub close our session
                        writer.shutdown().await.ok();
                        return Ok(());
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}
