//! Broker messaging: review-created notifications out, user lifecycle events in.
//!
//! Review notifications go to named work queues that hold messages until a
//! consumer takes them. User lifecycle events arrive on fanout exchanges and
//! only reach subscriptions bound at publish time.
//!
//! Transports implement [`EventBroker`]; the rest of the crate only sees the
//! publisher and subscriber built on top of it, so a RabbitMQ connection and
//! the in-process [`memory::MemoryBroker`] are interchangeable.

pub mod amqp;
pub mod memory;
pub mod publisher;
pub mod subscriber;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::reviews::domain::{Rating, ReviewType, UserDeleted, UsernameChange};

pub const ACCOMMODATION_REVIEW_CREATED: &str = "accommodation-review-created";
pub const HOST_REVIEW_CREATED: &str = "host-review-created";
pub const USERNAME_UPDATED: &str = "username-updated";
pub const USER_DELETED: &str = "user-deleted";

/// Raw message as carried by a broker. `topic` names the queue or exchange
/// the message came through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
}

pub type MessageStream = BoxStream<'static, BrokerMessage>;

/// Queue and fanout operations a message broker has to honour.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Declare the non-durable work queue `queue` and append `payload` to it.
    /// The message waits in the queue until some consumer takes it.
    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Take messages from the work queue `queue`. Consumers of one queue
    /// compete: each message reaches exactly one of them.
    async fn consume_queue(&self, queue: &str) -> Result<MessageStream, BrokerError>;

    /// Publish `payload` on the durable fanout exchange `exchange`.
    async fn publish_fanout(&self, exchange: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Bind a fresh exclusive queue to each of `exchanges` and merge them into
    /// one stream. Messages published before the binding are never seen. The
    /// stream ends when the underlying connection is lost.
    async fn subscribe_fanout(&self, exchanges: &[&str]) -> Result<MessageStream, BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("broker rejected publish: {0}")]
    Publish(String),
    #[error("broker rejected subscription: {0}")]
    Subscribe(String),
}

/// Notification emitted once a review has been stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewCreated {
    pub kind: ReviewType,
    pub rating: Rating,
}

#[derive(Serialize)]
struct RatingPayload {
    rating: u8,
}

impl ReviewCreated {
    pub fn topic(&self) -> &'static str {
        match self.kind {
            ReviewType::Accommodation => ACCOMMODATION_REVIEW_CREATED,
            ReviewType::Host => HOST_REVIEW_CREATED,
        }
    }

    pub fn payload(&self) -> Result<Bytes, serde_json::Error> {
        let body = serde_json::to_vec(&RatingPayload {
            rating: self.rating.value(),
        })?;
        Ok(Bytes::from(body))
    }
}

/// Inbound event from the identity system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    UsernameUpdated(UsernameChange),
    UserDeleted(UserDeleted),
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unexpected topic '{0}'")]
    UnknownTopic(String),
    #[error("malformed {topic} payload: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

impl UserEvent {
    pub fn decode(message: &BrokerMessage) -> Result<Self, EventDecodeError> {
        let malformed = |source: serde_json::Error| EventDecodeError::Payload {
            topic: message.topic.clone(),
            source,
        };

        match message.topic.as_str() {
            USERNAME_UPDATED => serde_json::from_slice(&message.payload)
                .map(UserEvent::UsernameUpdated)
                .map_err(malformed),
            USER_DELETED => serde_json::from_slice(&message.payload)
                .map(UserEvent::UserDeleted)
                .map_err(malformed),
            other => Err(EventDecodeError::UnknownTopic(other.to_string())),
        }
    }
}
