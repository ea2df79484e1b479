//! gRPC Integration Tests
//!
//! These tests stand up `BrokerService` behind a real tonic listener on an
//! ephemeral port and drive it through `BrokerClient`, exercising the full
//! adapter path: produce acknowledgement mapping, consume streaming with
//! replay and tail follow, the retention-gap fast-forward, storage-failure
//! propagation, and subscriber cleanup when a client goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_broker::CommitLog;
use strata_core::Message;
use strata_proto::strata::broker_client::BrokerClient;
use strata_proto::strata::broker_server::BrokerServer;
use strata_proto::strata::{
    ConsumeRequest, CreateTopicRequest, ListTopicsRequest, ProduceRequest, TopicStatsRequest,
};
use strata_server::BrokerService;
use strata_storage::{
    Datastore, MemoryDatastore, MessageSink, RetentionConfig, SqliteDatastore,
};
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Channel;
use tonic::Code;

const BLOCK: Duration = Duration::from_millis(200);
const WAIT: Duration = Duration::from_secs(2);

/// Serve `BrokerService` over a fresh localhost port and return a connected
/// client plus the commit log backing the server.
async fn start_broker(
    datastore: Arc<dyn Datastore>,
) -> (BrokerClient<Channel>, Arc<CommitLog>) {
    let commit_log = Arc::new(CommitLog::new(datastore).await.unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = BrokerServer::new(BrokerService::new(Arc::clone(&commit_log)));
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = BrokerClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    (client, commit_log)
}

async fn produce(client: &mut BrokerClient<Channel>, topic: &str, payload: &str) {
    client
        .produce(ProduceRequest {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        })
        .await
        .unwrap();
}

// -------------------------------------------------------------------
// Produce + consume
// -------------------------------------------------------------------

#[tokio::test]
async fn test_produce_then_consume_from_zero() {
    let (mut client, _log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    for payload in ["p1", "p2", "p3"] {
        produce(&mut client, "t", payload).await;
    }

    let mut stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: 0,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();

    for (i, payload) in ["p1", "p2", "p3"].iter().enumerate() {
        let message = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
        assert_eq!(message.offset, i as i64);
        assert_eq!(message.payload, payload.as_bytes());
    }

    // Caught up: no further message arrives.
    assert!(timeout(BLOCK, stream.message()).await.is_err());
}

#[tokio::test]
async fn test_consume_replays_from_explicit_offset() {
    let (mut client, _log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    for payload in ["a", "b", "c"] {
        produce(&mut client, "t", payload).await;
    }

    let mut stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: 1,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();

    let first = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.offset, 1);
    assert_eq!(first.payload, b"b");
    let second = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(second.offset, 2);
    assert_eq!(second.payload, b"c");
}

#[tokio::test]
async fn test_tail_consumer_receives_only_new_messages() {
    let (mut client, _log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    produce(&mut client, "t", "a").await;
    produce(&mut client, "t", "b").await;

    // The consume call returns once the subscriber is registered, so the
    // next produce is guaranteed to land after the attach.
    let mut stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: -1,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();

    produce(&mut client, "t", "c").await;

    let message = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(message.offset, 2);
    assert_eq!(message.payload, b"c");
}

// -------------------------------------------------------------------
// Topic admin
// -------------------------------------------------------------------

#[tokio::test]
async fn test_create_list_and_stats() {
    let (mut client, _log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    client
        .create_topic(CreateTopicRequest {
            topic: "events".to_string(),
        })
        .await
        .unwrap();
    // Idempotent.
    client
        .create_topic(CreateTopicRequest {
            topic: "events".to_string(),
        })
        .await
        .unwrap();

    let topics = client
        .list_topics(ListTopicsRequest {})
        .await
        .unwrap()
        .into_inner()
        .topics;
    assert_eq!(topics, vec!["events"]);

    produce(&mut client, "events", "one").await;
    produce(&mut client, "events", "two").await;

    let stats = client
        .topic_stats(TopicStatsRequest {
            topic: "events".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.last_offset, 1);
}

#[tokio::test]
async fn test_stats_for_unknown_topic_is_not_found() {
    let (mut client, _log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    let err = client
        .topic_stats(TopicStatsRequest {
            topic: "missing".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

// -------------------------------------------------------------------
// Failure mapping
// -------------------------------------------------------------------

/// Memory datastore that can be told to fail the next insert or the next
/// streaming read.
struct FlakyDatastore {
    inner: MemoryDatastore,
    fail_next_insert: AtomicBool,
    fail_next_stream: AtomicBool,
}

impl FlakyDatastore {
    fn new() -> Self {
        Self {
            inner: MemoryDatastore::new(),
            fail_next_insert: AtomicBool::new(false),
            fail_next_stream: AtomicBool::new(false),
        }
    }

    fn injected() -> strata_storage::Error {
        strata_storage::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "injected failure",
        ))
    }
}

#[async_trait]
impl Datastore for FlakyDatastore {
    async fn initialize(&self) -> strata_storage::Result<()> {
        self.inner.initialize().await
    }
    async fn create_topic(&self, topic: &str) -> strata_storage::Result<()> {
        self.inner.create_topic(topic).await
    }
    async fn list_topics(&self) -> strata_storage::Result<Vec<String>> {
        self.inner.list_topics().await
    }
    async fn last_offset(&self, topic: &str) -> strata_storage::Result<i64> {
        self.inner.last_offset(topic).await
    }
    async fn insert_message(
        &self,
        topic: &str,
        message: &Message,
    ) -> strata_storage::Result<()> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.insert_message(topic, message).await
    }
    async fn stream_messages(
        &self,
        topic: &str,
        from_offset: i64,
        callback: MessageSink<'_>,
    ) -> strata_storage::Result<()> {
        if self.fail_next_stream.swap(false, Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.stream_messages(topic, from_offset, callback).await
    }
    async fn num_messages(&self, topic: &str) -> strata_storage::Result<i64> {
        self.inner.num_messages(topic).await
    }
    async fn flush(&self) -> strata_storage::Result<()> {
        self.inner.flush().await
    }
    async fn garbage_collect(&self, topic: &str) -> strata_storage::Result<()> {
        self.inner.garbage_collect(topic).await
    }
    async fn close(&self) -> strata_storage::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_rejected_append_maps_to_aborted() {
    let ds = Arc::new(FlakyDatastore::new());
    let (mut client, _log) = start_broker(Arc::clone(&ds) as Arc<dyn Datastore>).await;

    produce(&mut client, "t", "first").await;

    ds.fail_next_insert.store(true, Ordering::SeqCst);
    let err = client
        .produce(ProduceRequest {
            topic: "t".to_string(),
            payload: b"doomed".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Aborted);

    // The log did not advance and the next append succeeds.
    produce(&mut client, "t", "second").await;
    let stats = client
        .topic_stats(TopicStatsRequest {
            topic: "t".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.last_offset, 1);
}

#[tokio::test]
async fn test_stream_failure_maps_to_data_loss() {
    let ds = Arc::new(FlakyDatastore::new());
    let (mut client, _log) = start_broker(Arc::clone(&ds) as Arc<dyn Datastore>).await;

    produce(&mut client, "t", "payload").await;

    ds.fail_next_stream.store(true, Ordering::SeqCst);
    let mut stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: 0,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();

    let err = timeout(WAIT, stream.message()).await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::DataLoss);
}

// -------------------------------------------------------------------
// Retention gap
// -------------------------------------------------------------------

#[tokio::test]
async fn test_consumer_skips_past_collected_prefix() {
    let ds = Arc::new(
        SqliteDatastore::open_in_memory(RetentionConfig {
            max_log_bytes: -1,
            max_log_age_secs: 1,
        })
        .await
        .unwrap(),
    );
    ds.initialize().await.unwrap();
    let (mut client, _log) = start_broker(Arc::clone(&ds) as Arc<dyn Datastore>).await;

    produce(&mut client, "t", "old").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    ds.garbage_collect("t").await.unwrap();
    assert_eq!(ds.num_messages("t").await.unwrap(), 0);

    // The cursor points below the high-water mark into collected history;
    // the consumer fast-forwards and picks up the next live message.
    let mut stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: 0,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();

    produce(&mut client, "t", "fresh").await;

    let message = timeout(WAIT, stream.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(message.offset, 1);
    assert_eq!(message.payload, b"fresh");
}

// -------------------------------------------------------------------
// Client disconnect
// -------------------------------------------------------------------

#[tokio::test]
async fn test_client_drop_closes_subscriber() {
    let (mut client, log) = start_broker(Arc::new(MemoryDatastore::new())).await;

    produce(&mut client, "t", "seed").await;
    let topic = log.get_or_new_topic("t").await.unwrap();
    assert_eq!(topic.subscriber_count(), 0);

    let stream = client
        .consume(ConsumeRequest {
            topic: "t".to_string(),
            offset: -1,
            since: 0,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(topic.subscriber_count(), 1);

    drop(stream);

    // The delivery task notices the closed response channel and
    // deregisters its subscriber.
    let deadline = tokio::time::Instant::now() + WAIT;
    while topic.subscriber_count() != 0 {
        assert!(tokio::time::Instant::now() < deadline, "subscriber not cleaned up");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
