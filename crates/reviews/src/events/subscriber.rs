use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{BrokerMessage, EventBroker, EventDecodeError, UserEvent, USERNAME_UPDATED, USER_DELETED};

/// Reacts to user lifecycle events.
#[async_trait]
pub trait UserEventHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, event: UserEvent) -> Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    #[error("handler failed: {0}")]
    Handler(#[source] E),
}

/// Backoff bounds between resubscription attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// Long-lived listener for `username-updated` and `user-deleted`.
///
/// Delivery is at-most-once: every message is consumed exactly when it
/// arrives and failures are logged, never retried.
pub struct UserEventSubscriber<H> {
    broker: Arc<dyn EventBroker>,
    handler: Arc<H>,
    policy: ReconnectPolicy,
}

impl<H> UserEventSubscriber<H>
where
    H: UserEventHandler + 'static,
{
    pub const TOPICS: [&'static str; 2] = [USERNAME_UPDATED, USER_DELETED];

    pub fn new(broker: Arc<dyn EventBroker>, handler: Arc<H>) -> Self {
        Self {
            broker,
            handler,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decode one message and hand it to the handler.
    pub async fn process(&self, message: &BrokerMessage) -> Result<(), ProcessingError<H::Error>> {
        let event = UserEvent::decode(message)?;
        debug!(topic = %message.topic, ?event, "processing user event");
        self.handler
            .handle(event)
            .await
            .map_err(ProcessingError::Handler)
    }

    /// Listen until `shutdown` flips to true or its sender is dropped.
    /// Broker failures never end the loop; it resubscribes with backoff.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut delay = self.policy.initial_delay;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.broker.subscribe_fanout(&Self::TOPICS).await {
                Ok(mut messages) => {
                    info!(topics = ?Self::TOPICS, "listening for user events");
                    delay = self.policy.initial_delay;

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                info!("user event subscriber stopping");
                                return;
                            }
                            next = messages.next() => match next {
                                Some(message) => {
                                    if let Err(err) = self.process(&message).await {
                                        warn!(topic = %message.topic, error = %err, "dropping user event");
                                    }
                                }
                                None => {
                                    warn!("user event stream closed by broker");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => warn!(error = %err, "unable to subscribe to user events"),
            }

            debug!(?delay, "resubscribing to user events after backoff");
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("user event subscriber stopping");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.policy.next_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::memory::MemoryBroker;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<UserEvent>>,
        refuse: bool,
    }

    #[async_trait]
    impl UserEventHandler for RecordingHandler {
        type Error = Refused;

        async fn handle(&self, event: UserEvent) -> Result<(), Refused> {
            if self.refuse {
                return Err(Refused);
            }
            self.events.lock().expect("handler mutex").push(event);
            Ok(())
        }
    }

    fn message(topic: &str, body: &'static [u8]) -> BrokerMessage {
        BrokerMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(body),
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(
            policy.next_delay(Duration::from_millis(100)),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.next_delay(Duration::from_millis(200)),
            Duration::from_millis(300)
        );
    }

    #[tokio::test]
    async fn process_decodes_and_dispatches() {
        let handler = Arc::new(RecordingHandler::default());
        let subscriber = UserEventSubscriber::new(Arc::new(MemoryBroker::new()), handler.clone());

        subscriber
            .process(&message(USER_DELETED, br#"{"username":"carol"}"#))
            .await
            .expect("processed");

        let events = handler.events.lock().expect("handler mutex").clone();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn process_reports_decode_and_handler_failures() {
        let refusing = Arc::new(RecordingHandler {
            refuse: true,
            ..RecordingHandler::default()
        });
        let subscriber = UserEventSubscriber::new(Arc::new(MemoryBroker::new()), refusing);

        assert!(matches!(
            subscriber.process(&message(USER_DELETED, b"][")).await,
            Err(ProcessingError::Decode(_))
        ));
        assert!(matches!(
            subscriber
                .process(&message(USER_DELETED, br#"{"username":"carol"}"#))
                .await,
            Err(ProcessingError::Handler(Refused))
        ));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let broker = Arc::new(MemoryBroker::new());
        let handler = Arc::new(RecordingHandler::default());
        let (stop, stopped) = watch::channel(false);

        let task = tokio::spawn(UserEventSubscriber::new(broker, handler).run(stopped));
        stop.send(true).expect("subscriber still listening");

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("subscriber exits")
            .expect("subscriber task does not panic");
    }
}
