//! # SyncShm Binary
//!
//! Runs the producer, the consumer, or both sides of the shared memory
//! handshake.
//!
//! # Usage
//!
//! ```bash
//! # Reference demo: both roles in one process, one thread each
//! syncshm
//!
//! # Two independent processes, started in any order
//! syncshm --role consumer &
//! syncshm --role producer
//!
//! # Custom segment and payload, verbose JSON logs
//! syncshm --config config/syncshm.toml --name Demo --message "ping" -v --json
//! ```

#![deny(warnings)]

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::thread;
use syncshm_common::prelude::*;
use syncshm_shared_memory::{Consumer, Producer, ShmError, init_tracing};
use tracing::{Level, error, info};

/// Which side of the handshake to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Producer and consumer on separate threads
    Both,
    /// Create the segment and publish the message
    Producer,
    /// Wait for the message, read it and remove the segment
    Consumer,
}

/// SyncShm - one-shot producer/consumer handshake over POSIX shared memory
#[derive(Parser, Debug)]
#[command(name = "syncshm")]
#[command(version)]
#[command(about = "One-shot producer/consumer handshake over POSIX shared memory")]
#[command(long_about = None)]
struct Args {
    /// Role to run
    #[arg(short, long, value_enum, default_value_t = Role::Both)]
    role: Role,

    /// Path to configuration file (syncshm.toml). Built-in defaults when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Segment name, overrides [segment].name
    #[arg(short, long)]
    name: Option<String>,

    /// Payload, overrides [producer].message
    #[arg(short, long)]
    message: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("syncshm: {}", e);
            std::process::exit(1);
        }
    };

    let level = if args.verbose {
        Level::DEBUG
    } else {
        config.shared.log_level.into()
    };
    init_tracing(level, args.json);

    info!(
        "{} v{} starting ({:?})",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION"),
        args.role
    );

    if let Err(e) = run(args.role, &config) {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Load the file (or defaults), apply CLI overrides, then validate.
fn load_config(args: &Args) -> Result<HandshakeConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => HandshakeConfig::load(path)?,
        None => HandshakeConfig::default(),
    };
    if let Some(name) = &args.name {
        config.segment.name = name.clone();
    }
    if let Some(message) = &args.message {
        config.producer.message = message.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(role: Role, config: &HandshakeConfig) -> Result<(), ShmError> {
    match role {
        Role::Producer => run_producer(config),
        Role::Consumer => run_consumer(config),
        Role::Both => {
            // Consumer first so the open-retry path is exercised.
            let consumer = {
                let config = config.clone();
                thread::Builder::new()
                    .name("consumer".into())
                    .spawn(move || run_consumer(&config))?
            };
            let producer = {
                let config = config.clone();
                thread::Builder::new()
                    .name("producer".into())
                    .spawn(move || run_producer(&config))?
            };

            let producer_result = join_role(producer, "producer");
            let consumer_result = join_role(consumer, "consumer");
            producer_result.and(consumer_result)
        }
    }
}

fn run_producer(config: &HandshakeConfig) -> Result<(), ShmError> {
    Producer::new(&config.segment.name, config.producer.clone())?.run()?;
    Ok(())
}

fn run_consumer(config: &HandshakeConfig) -> Result<(), ShmError> {
    let report = Consumer::new(&config.segment.name, config.consumer.clone())?.run()?;
    info!(
        "Consumer: {} bytes after {} open retries",
        report.message.len(),
        report.open_attempts
    );
    Ok(())
}

fn join_role(
    handle: thread::JoinHandle<Result<(), ShmError>>,
    role: &str,
) -> Result<(), ShmError> {
    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("{} failed: {}", role, e);
            Err(e)
        }
        Err(_) => Err(ShmError::Io {
            source: std::io::Error::other(format!("{} thread panicked", role)),
        }),
    }
}
