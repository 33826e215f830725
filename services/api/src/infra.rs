use axum::http::HeaderValue;
use metrics_exporter_prometheus::PrometheusHandle;
use reviews::config::BrokerConfig;
use reviews::error::AppError;
use reviews::events::memory::MemoryBroker;
use reviews::events::amqp::AmqpBroker;
use reviews::events::publisher::BrokerEventPublisher;
use reviews::events::EventBroker;
use reviews::gateway::ReservationsClient;
use reviews::reviews::{MongoReviewRepository, ReviewService};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub(crate) type LiveReviewService =
    ReviewService<MongoReviewRepository, ReservationsClient, BrokerEventPublisher>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Open the message broker: RabbitMQ by default, in-process when requested.
pub(crate) async fn connect_broker(
    config: &BrokerConfig,
    in_memory: bool,
) -> Result<Arc<dyn EventBroker>, AppError> {
    if in_memory {
        info!("using in-process message broker");
        return Ok(Arc::new(MemoryBroker::new()));
    }
    let broker = AmqpBroker::connect(config).await?;
    Ok(Arc::new(broker))
}

/// CORS for browser clients. Without a configured origin any origin is allowed.
pub(crate) fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match allowed_origin {
        None => layer.allow_origin(Any),
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                warn!(%origin, "ignoring unparseable allowed origin; cross-origin requests are refused");
                layer
            }
        },
    }
}
