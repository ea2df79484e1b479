//! Strata CLI (stratactl)
//!
//! Command-line client for a running Strata broker: topic administration,
//! a small producer, and a following consumer.
//!
//! ## Quick Start
//!
//! ```bash
//! # Point at the broker (default: http://127.0.0.1:5672)
//! export STRATA_ADDR=http://127.0.0.1:5672
//!
//! # Create a topic and inspect it
//! stratactl topic create events
//! stratactl topic list
//! stratactl topic stats events
//!
//! # Produce a few payloads
//! stratactl produce events "first" "second" "third"
//!
//! # Replay from the beginning and keep following the tail
//! stratactl consume events --offset 0
//!
//! # Only new messages
//! stratactl consume events
//! ```
//!
//! The consumer prints one `offset<TAB>payload` line per message and runs
//! until interrupted (or until `--limit` messages arrived).

use anyhow::Context;
use clap::{Parser, Subcommand};
use strata_proto::strata::broker_client::BrokerClient;
use strata_proto::strata::{
    ConsumeRequest, CreateTopicRequest, ListTopicsRequest, ProduceRequest, TopicStatsRequest,
};
use tonic::transport::Channel;

#[derive(Parser)]
#[command(name = "stratactl")]
#[command(about = "Strata broker command-line client", long_about = None)]
struct Cli {
    /// Broker address
    #[arg(long, env = "STRATA_ADDR", default_value = "http://127.0.0.1:5672")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Topic administration
    Topic {
        #[command(subcommand)]
        command: TopicCommand,
    },
    /// Append payloads to a topic
    Produce {
        topic: String,
        /// One payload per argument
        #[arg(required = true)]
        payloads: Vec<String>,
    },
    /// Stream messages from a topic
    Consume {
        topic: String,
        /// First offset to deliver; -1 follows the tail
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        offset: i64,
        /// Reserved time-based start (unix seconds)
        #[arg(long, default_value_t = 0)]
        since: i64,
        /// Stop after this many messages
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Subcommand)]
enum TopicCommand {
    /// Create a topic
    Create { name: String },
    /// List all topics
    List,
    /// Show message count and high-water mark
    Stats { name: String },
}

async fn connect(server: &str) -> anyhow::Result<BrokerClient<Channel>> {
    BrokerClient::connect(server.to_string())
        .await
        .with_context(|| format!("connecting to {server}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut client = connect(&cli.server).await?;

    match cli.command {
        Command::Topic { command } => match command {
            TopicCommand::Create { name } => {
                client
                    .create_topic(CreateTopicRequest { topic: name.clone() })
                    .await?;
                println!("created topic {name}");
            }
            TopicCommand::List => {
                let topics = client
                    .list_topics(ListTopicsRequest {})
                    .await?
                    .into_inner()
                    .topics;
                for topic in topics {
                    println!("{topic}");
                }
            }
            TopicCommand::Stats { name } => {
                let stats = client
                    .topic_stats(TopicStatsRequest { topic: name.clone() })
                    .await?
                    .into_inner();
                println!(
                    "{name}: {} messages, last offset {}",
                    stats.message_count, stats.last_offset
                );
            }
        },
        Command::Produce { topic, payloads } => {
            let count = payloads.len();
            for payload in payloads {
                client
                    .produce(ProduceRequest {
                        topic: topic.clone(),
                        payload: payload.into_bytes(),
                    })
                    .await?;
            }
            println!("accepted {count} message(s) on {topic}");
        }
        Command::Consume {
            topic,
            offset,
            since,
            limit,
        } => {
            let mut stream = client
                .consume(ConsumeRequest {
                    topic,
                    offset,
                    since,
                })
                .await?
                .into_inner();

            let mut received: u64 = 0;
            while let Some(message) = stream.message().await? {
                println!(
                    "{}\t{}",
                    message.offset,
                    String::from_utf8_lossy(&message.payload)
                );
                received += 1;
                if limit.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
        }
    }
    Ok(())
}
