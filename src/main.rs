//! # Main — CLI Entry Point
//!
//! Parses the command line, validates configuration, and hands off to the
//! coordinator. Structured diagnostic logging goes to stderr via `tracing`;
//! the detector's own machine-readable output (config/heartbeat/summary/
//! event records) is the separate stdout JSON event sink owned by
//! `coordinator::run`.

mod cli;

use anyhow::Result;
use clap::Parser;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Structured logging: LOG_FORMAT=json for container log collectors,
    // human-readable otherwise. Always goes to stderr, never stdout, so it
    // never interleaves with the JSON event sink.
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    let cli = cli::Cli::parse();
    cli::run(cli)
}
