use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrokerError, EventBroker, ReviewCreated};

const DISPATCH_QUEUE_DEPTH: usize = 64;

/// Outbound side used by the review service.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ReviewCreated) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("unable to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("event dispatcher is not running")]
    DispatcherClosed,
    #[error("event hand-off timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

struct Dispatch {
    topic: &'static str,
    payload: Bytes,
    ack: oneshot::Sender<Result<(), BrokerError>>,
}

/// Publisher that funnels every event through one dispatch task owning the
/// broker handle, so publishes never interleave on the channel. Callers wait
/// only for the broker to accept the message, bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct BrokerEventPublisher {
    sender: mpsc::Sender<Dispatch>,
    timeout: Duration,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch").field("topic", &self.topic).finish()
    }
}

impl BrokerEventPublisher {
    /// Start the dispatch task. It exits once every publisher clone is dropped.
    pub fn spawn(broker: Arc<dyn EventBroker>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Dispatch>(DISPATCH_QUEUE_DEPTH);

        let handle = tokio::spawn(async move {
            while let Some(dispatch) = receiver.recv().await {
                let result = broker.send_to_queue(dispatch.topic, dispatch.payload).await;
                match &result {
                    Ok(()) => debug!(queue = dispatch.topic, "event queued"),
                    Err(err) => warn!(queue = dispatch.topic, error = %err, "event publish failed"),
                }
                // The caller may have timed out and gone away.
                let _ = dispatch.ack.send(result);
            }
            debug!("event dispatcher stopped");
        });

        (Self { sender, timeout }, handle)
    }
}

#[async_trait]
impl EventPublisher for BrokerEventPublisher {
    async fn publish(&self, event: ReviewCreated) -> Result<(), PublishError> {
        let payload = event.payload()?;
        let (ack, acknowledged) = oneshot::channel();
        let dispatch = Dispatch {
            topic: event.topic(),
            payload,
            ack,
        };

        let handoff = async {
            self.sender
                .send(dispatch)
                .await
                .map_err(|_| PublishError::DispatcherClosed)?;
            acknowledged
                .await
                .map_err(|_| PublishError::DispatcherClosed)?
                .map_err(PublishError::from)
        };

        tokio::time::timeout(self.timeout, handoff)
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))?
    }
}
