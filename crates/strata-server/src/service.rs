//! Broker gRPC Service
//!
//! Translates the wire API into the four core calls the broker exposes:
//! `get_or_new_topic`, `add_entry`, `new_subscriber` + `stream`, and
//! `commit`/`close`.
//!
//! ## Produce Path
//!
//! Each produce request becomes one `Entry` whose ack callback feeds a
//! oneshot channel. The RPC completes when the topic runner reports the
//! commit outcome: success maps to an OK response, a storage failure maps
//! to `ABORTED` so the client can retry (the disposition the original
//! transport expressed by rejecting the delivery).
//!
//! ## Consume Path
//!
//! Each consume request registers a subscriber and spawns a delivery task.
//! The task alternates between one blocking `stream` poll (collecting a
//! batch to end-of-log) and pushing that batch onto the response channel,
//! committing each offset only after its message was accepted by the
//! transport. When the client goes away the response channel closes and
//! the task closes the subscriber on its way out.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::Stream;
use strata_broker::{CommitLog, Subscriber, Topic};
use strata_core::Message;
use strata_proto::strata::broker_server::Broker;
use strata_proto::strata::{
    ConsumeRequest, ConsumeResponse, CreateTopicRequest, CreateTopicResponse, ListTopicsRequest,
    ListTopicsResponse, ProduceRequest, ProduceResponse, TopicStatsRequest, TopicStatsResponse,
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

/// gRPC facade over the commit log.
pub struct BrokerService {
    commit_log: Arc<CommitLog>,
    subscriber_seq: AtomicU64,
}

impl BrokerService {
    pub fn new(commit_log: Arc<CommitLog>) -> Self {
        Self {
            commit_log,
            subscriber_seq: AtomicU64::new(0),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Status {
        Status::internal(error.to_string())
    }
}

#[tonic::async_trait]
impl Broker for BrokerService {
    async fn create_topic(
        &self,
        request: Request<CreateTopicRequest>,
    ) -> Result<Response<CreateTopicResponse>, Status> {
        let req = request.into_inner();
        self.commit_log
            .get_or_new_topic(&req.topic)
            .await
            .map_err(Self::internal)?;
        Ok(Response::new(CreateTopicResponse {}))
    }

    async fn list_topics(
        &self,
        _request: Request<ListTopicsRequest>,
    ) -> Result<Response<ListTopicsResponse>, Status> {
        let topics = self
            .commit_log
            .datastore()
            .list_topics()
            .await
            .map_err(Self::internal)?;
        Ok(Response::new(ListTopicsResponse { topics }))
    }

    async fn topic_stats(
        &self,
        request: Request<TopicStatsRequest>,
    ) -> Result<Response<TopicStatsResponse>, Status> {
        let req = request.into_inner();
        let datastore = self.commit_log.datastore();
        let message_count = datastore
            .num_messages(&req.topic)
            .await
            .map_err(|e| Status::not_found(e.to_string()))?;
        let last_offset = datastore
            .last_offset(&req.topic)
            .await
            .map_err(|e| Status::not_found(e.to_string()))?;
        Ok(Response::new(TopicStatsResponse {
            message_count,
            last_offset,
        }))
    }

    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        let req = request.into_inner();
        let topic = self
            .commit_log
            .get_or_new_topic(&req.topic)
            .await
            .map_err(Self::internal)?;

        let (tx, rx) = oneshot::channel();
        topic
            .add_entry(
                Message::unassigned(req.payload),
                Box::new(move |committed| {
                    let _ = tx.send(committed);
                }),
            )
            .await
            .map_err(Self::internal)?;

        match rx.await {
            Ok(true) => Ok(Response::new(ProduceResponse {})),
            Ok(false) => Err(Status::aborted("append rejected by storage")),
            Err(_) => Err(Status::internal("commit outcome was dropped")),
        }
    }

    type ConsumeStream =
        Pin<Box<dyn Stream<Item = Result<ConsumeResponse, Status>> + Send + 'static>>;

    async fn consume(
        &self,
        request: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStream>, Status> {
        let req = request.into_inner();
        // Read-side attaches auto-create the topic so subscribers may
        // precede producers.
        let topic = self
            .commit_log
            .get_or_new_topic(&req.topic)
            .await
            .map_err(Self::internal)?;

        let id = format!("sub-{}", self.subscriber_seq.fetch_add(1, Ordering::Relaxed));
        debug!(topic = %req.topic, subscriber = %id, offset = req.offset, "consumer attached");
        let subscriber = topic.new_subscriber(id, req.offset, req.since);

        let (tx, rx) = mpsc::channel::<Result<ConsumeResponse, Status>>(16);
        tokio::spawn(drive_subscriber(topic, subscriber, tx));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Deliver committed messages to one consumer until it disconnects or the
/// stream hits an unrecoverable storage error.
async fn drive_subscriber(
    topic: Arc<Topic>,
    subscriber: Subscriber,
    tx: mpsc::Sender<Result<ConsumeResponse, Status>>,
) {
    loop {
        let mut batch = Vec::new();
        // Wake on new data or on the client going away, whichever first.
        let mut collect = |message: Message| {
            batch.push(message);
            Ok(())
        };
        let stream_fut = subscriber.stream(&mut collect);
        let poll = tokio::select! {
            poll = stream_fut => poll,
            _ = tx.closed() => {
                subscriber.close();
                return;
            }
        };

        if let Err(error) = poll {
            warn!(topic = %topic.name(), subscriber = %subscriber.id(), %error, "subscriber stream failed");
            let _ = tx.send(Err(Status::data_loss(error.to_string()))).await;
            break;
        }

        if batch.is_empty() {
            if subscriber.is_closed() {
                break;
            }
            // Everything below the high-water mark was removed by
            // retention; skip the cursor forward and wait again.
            subscriber.commit(topic.last_committed());
            continue;
        }

        for message in batch {
            let offset = message.offset;
            let reply = ConsumeResponse {
                offset,
                payload: message.payload.to_vec(),
            };
            if tx.send(Ok(reply)).await.is_err() {
                // Client went away.
                subscriber.close();
                return;
            }
            subscriber.commit(offset);
        }
    }
    subscriber.close();
}
