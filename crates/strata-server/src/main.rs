//! Strata Broker Server
//!
//! Main entry point for the Strata commit-log broker.
//!
//! ## Overview
//!
//! The server wires four pieces together:
//! - a **datastore** selected on the command line (`memory`, `sqlite`, or
//!   `file`)
//! - the **commit log** recovered from that datastore at startup
//! - the **maintenance tasks** (periodic flush for the file backend,
//!   periodic garbage collection when retention is enabled)
//! - the **gRPC listener** exposing produce/consume to clients
//!
//! ## Example Usage
//!
//! ```bash
//! # Durable file-backed broker with a 2-minute GC cycle
//! strata-server -d /var/lib/strata -t file -g 120
//!
//! # Ephemeral in-memory broker on a custom port
//! strata-server -t memory -p 7100
//!
//! # SQLite broker keeping at most one hour of log
//! strata-server -t sqlite -a 3600 -g 60
//! ```
//!
//! ## Logging
//!
//! Controlled by `RUST_LOG` (default `info`):
//!
//! ```bash
//! RUST_LOG=debug strata-server -t file
//! ```
//!
//! The process exits 0 on orderly shutdown (ctrl-c) and non-zero when
//! initialization fails before the listener starts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use strata_broker::CommitLog;
use strata_proto::strata::broker_server::BrokerServer;
use strata_server::BrokerService;
use strata_storage::{
    Datastore, FileDatastore, Flusher, GarbageCollector, MemoryDatastore, RetentionConfig,
    SqliteDatastore,
};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DatastoreKind {
    Memory,
    Sqlite,
    File,
}

#[derive(Parser, Debug)]
#[command(name = "strata-server")]
#[command(about = "Single-node commit-log message broker", long_about = None)]
struct Args {
    /// Interface address to listen on
    #[arg(short = 'l', long, default_value = "127.0.0.1")]
    listen_addr: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 5672)]
    listen_port: u16,

    /// Path to the data directory
    #[arg(short = 'd', long, default_value = "data")]
    data_dir: PathBuf,

    /// Datastore backend
    #[arg(short = 't', long, value_enum, default_value_t = DatastoreKind::File)]
    datastore: DatastoreKind,

    /// Max number of bytes in a log, -1 for unbounded
    #[arg(short = 'm', long, default_value_t = -1, allow_negative_numbers = true)]
    max_log_size: i64,

    /// Max age in seconds of log entries, -1 for unbounded
    #[arg(short = 'a', long, default_value_t = -1, allow_negative_numbers = true)]
    max_log_age: i64,

    /// Garbage collection interval in seconds, 0 disables collection
    #[arg(short = 'g', long, default_value_t = 0)]
    gc_interval: u64,

    /// Flush interval in seconds (file datastore only)
    #[arg(short = 'f', long, default_value_t = 10)]
    flush_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)?;
    let retention = RetentionConfig {
        max_log_bytes: args.max_log_size,
        max_log_age_secs: args.max_log_age,
    };

    let datastore: Arc<dyn Datastore> = match args.datastore {
        DatastoreKind::Memory => Arc::new(MemoryDatastore::new()),
        DatastoreKind::Sqlite => Arc::new(
            SqliteDatastore::open(args.data_dir.join("messages.db"), retention).await?,
        ),
        DatastoreKind::File => Arc::new(FileDatastore::open(&args.data_dir).await?),
    };
    datastore.initialize().await?;
    info!(backend = ?args.datastore, data_dir = %args.data_dir.display(), "datastore initialized");

    if args.gc_interval > 0 {
        tokio::spawn(
            GarbageCollector::new(
                Arc::clone(&datastore),
                Duration::from_secs(args.gc_interval),
            )
            .run(),
        );
    }
    if args.datastore == DatastoreKind::File && args.flush_interval > 0 {
        tokio::spawn(
            Flusher::new(
                Arc::clone(&datastore),
                Duration::from_secs(args.flush_interval),
            )
            .run(),
        );
    }

    let commit_log = Arc::new(CommitLog::new(Arc::clone(&datastore)).await?);

    let addr: SocketAddr = format!("{}:{}", args.listen_addr, args.listen_port).parse()?;
    info!(%addr, "listening");

    tonic::transport::Server::builder()
        .add_service(BrokerServer::new(BrokerService::new(commit_log)))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    datastore.flush().await?;
    datastore.close().await?;
    Ok(())
}
