//! Command line interface for the `boardsock` server binary.
//!
//! Kept free of crate imports so the build script can render a man page
//! from it.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `boardsock` binary.
#[derive(Debug, Parser)]
#[command(
    name = "boardsock",
    version,
    about = "WebSocket session server for imageboard clients"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Number of accept workers. Defaults to the number of CPU cores.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// JSON list of `{ "ip", "board" }` bans. Reloaded on SIGHUP.
    #[arg(long, value_name = "FILE")]
    pub bans: Option<PathBuf>,

    /// Deadline for writing a close frame, in milliseconds.
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub close_timeout_ms: u64,

    /// Deadline for the WebSocket upgrade, in milliseconds.
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub handshake_timeout_ms: u64,

    /// Consecutive rejected messages before a client is disconnected.
    /// Zero disables the limit.
    #[arg(long, default_value_t = 8)]
    pub max_app_errors: u32,

    /// Address to serve Prometheus metrics on.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
