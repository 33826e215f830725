use crate::cli::ServeArgs;
use crate::infra::{connect_broker, cors_layer, AppState, LiveReviewService};
use crate::routes::with_review_routes;
use crate::traffic::{self, VisitorLog, OS_SAMPLE_INTERVAL};
use axum::{middleware, Extension};
use axum_prometheus::PrometheusMetricLayer;
use reviews::config::AppConfig;
use reviews::error::AppError;
use reviews::events::publisher::BrokerEventPublisher;
use reviews::events::subscriber::UserEventSubscriber;
use reviews::gateway::ReservationsClient;
use reviews::reviews::MongoReviewRepository;
use reviews::telemetry;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    traffic::describe();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let broker = connect_broker(&config.broker, args.memory_broker).await?;
    let (publisher, dispatcher) =
        BrokerEventPublisher::spawn(broker.clone(), config.broker.timeout());
    let permissions = ReservationsClient::new(&config.reservations)?;
    let store = Arc::new(MongoReviewRepository::connect(&config.mongo).await?);
    let review_service: Arc<LiveReviewService> = Arc::new(LiveReviewService::new(
        store,
        Arc::new(permissions),
        Arc::new(publisher),
    ));

    let (stop_listening, shutdown) = watch::channel(false);
    let listener_task = tokio::spawn(
        UserEventSubscriber::new(broker, review_service.clone()).run(shutdown.clone()),
    );
    let sampler_task = traffic::spawn_os_sampler(OS_SAMPLE_INTERVAL, shutdown);

    let app = with_review_routes(review_service)
        .layer(middleware::from_fn_with_state(
            VisitorLog::default(),
            traffic::track_traffic,
        ))
        .layer(Extension(app_state))
        .layer(cors_layer(config.server.allowed_origin.as_deref()))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, reservations = %config.reservations.base_url, "review service ready");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    readiness_flag.store(false, Ordering::Release);
    let _ = stop_listening.send(true);
    if let Err(err) = listener_task.await {
        warn!(error = %err, "user event listener ended abnormally");
    }
    if let Err(err) = sampler_task.await {
        warn!(error = %err, "os metrics sampler ended abnormally");
    }
    // Router and listener are gone, so the dispatch channel is closed.
    if let Err(err) = dispatcher.await {
        warn!(error = %err, "event dispatcher ended abnormally");
    }

    info!("review service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
