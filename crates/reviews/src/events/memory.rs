//! In-process broker.
//!
//! Work queues are unbounded channels that keep messages until a consumer
//! takes them. Fanout exchanges are broadcast channels: every subscription
//! live at publish time receives the message, later subscribers never see it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

use super::{BrokerError, BrokerMessage, EventBroker, MessageStream};

const DEFAULT_CAPACITY: usize = 256;

type SharedReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<Bytes>>>;

#[derive(Debug, Clone)]
struct WorkQueue {
    sender: mpsc::UnboundedSender<Bytes>,
    receiver: SharedReceiver,
}

impl WorkQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    exchanges: Arc<RwLock<HashMap<String, broadcast::Sender<Bytes>>>>,
    queues: Arc<Mutex<HashMap<String, WorkQueue>>>,
    published: Arc<Mutex<Vec<BrokerMessage>>>,
    available: Arc<AtomicBool>,
    capacity: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` bounds how far a fanout subscriber may lag.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            exchanges: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(Mutex::new(HashMap::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
            capacity,
        }
    }

    /// Simulate an outage. While unavailable every call fails; going down
    /// also ends every open fanout subscription. Queued messages survive.
    pub fn set_available(&self, available: bool) {
        let was_available = self.available.swap(available, Ordering::SeqCst);
        if was_available && !available {
            self.exchanges
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Every message accepted so far, queued or fanned out, in order.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of live subscriptions bound to the fanout `exchange`.
    pub fn subscriber_count(&self, exchange: &str) -> usize {
        self.exchanges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(exchange)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn ensure_available(&self, unavailable: fn(String) -> BrokerError) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("memory broker unavailable".to_string()))
        }
    }

    fn record(&self, topic: &str, payload: &Bytes) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BrokerMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
    }

    fn queue(&self, name: &str) -> WorkQueue {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(WorkQueue::new)
            .clone()
    }
}

#[async_trait]
impl EventBroker for MemoryBroker {
    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.ensure_available(BrokerError::Publish)?;
        self.record(queue, &payload);
        self.queue(queue)
            .sender
            .send(payload)
            .map_err(|err| BrokerError::Publish(err.to_string()))
    }

    async fn consume_queue(&self, queue: &str) -> Result<MessageStream, BrokerError> {
        self.ensure_available(BrokerError::Subscribe)?;
        Ok(queue_stream(queue.to_string(), self.queue(queue).receiver))
    }

    async fn publish_fanout(&self, exchange: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.ensure_available(BrokerError::Publish)?;
        self.record(exchange, &payload);

        let exchanges = self.exchanges.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = exchanges.get(exchange) {
            // No receivers is fine: fanout without listeners drops the message.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe_fanout(&self, exchanges: &[&str]) -> Result<MessageStream, BrokerError> {
        self.ensure_available(BrokerError::Subscribe)?;

        let mut channels = self.exchanges.write().unwrap_or_else(PoisonError::into_inner);
        let streams = exchanges.iter().map(|exchange| {
            let receiver = channels
                .entry((*exchange).to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe();
            exchange_stream((*exchange).to_string(), receiver)
        });
        let streams: Vec<MessageStream> = streams.collect();

        Ok(stream::select_all(streams).boxed())
    }
}

fn queue_stream(queue: String, receiver: SharedReceiver) -> MessageStream {
    stream::unfold((queue, receiver), |(queue, receiver)| async move {
        let payload = receiver.lock().await.recv().await?;
        let message = BrokerMessage {
            topic: queue.clone(),
            payload,
        };
        Some((message, (queue, receiver)))
    })
    .boxed()
}

fn exchange_stream(exchange: String, receiver: broadcast::Receiver<Bytes>) -> MessageStream {
    stream::unfold((exchange, receiver), |(exchange, mut receiver)| async move {
        loop {
            match receiver.recv().await {
                Ok(payload) => {
                    let message = BrokerMessage {
                        topic: exchange.clone(),
                        payload,
                    };
                    return Some((message, (exchange, receiver)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%exchange, skipped, "subscriber lagged behind memory broker");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
