//! End-to-end review scenarios through the HTTP router, with the in-process
//! broker standing in for RabbitMQ so emitted events can be observed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use reviews::events::memory::MemoryBroker;
use reviews::events::publisher::BrokerEventPublisher;
use reviews::events::subscriber::UserEventSubscriber;
use reviews::events::{EventBroker, ACCOMMODATION_REVIEW_CREATED, USERNAME_UPDATED};
use reviews::reviews::{
    review_router, AccommodationReviewCheck, HostReviewCheck, InMemoryReviewStore, LoggedUser,
    PermissionError, PermissionOracle, ReviewQuery, ReviewService, USER_HEADER,
};

struct AllowAll;

#[async_trait]
impl PermissionOracle for AllowAll {
    async fn check_accommodation_review(
        &self,
        _check: &AccommodationReviewCheck,
    ) -> Result<bool, PermissionError> {
        Ok(true)
    }

    async fn check_host_review(&self, _check: &HostReviewCheck) -> Result<bool, PermissionError> {
        Ok(true)
    }
}

type Service = ReviewService<InMemoryReviewStore, AllowAll, BrokerEventPublisher>;

struct Harness {
    broker: Arc<MemoryBroker>,
    store: Arc<InMemoryReviewStore>,
    service: Arc<Service>,
}

impl Harness {
    fn new() -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let (publisher, _dispatcher) =
            BrokerEventPublisher::spawn(broker.clone(), Duration::from_secs(1));
        let store = Arc::new(InMemoryReviewStore::new());
        let service = Arc::new(ReviewService::new(
            store.clone(),
            Arc::new(AllowAll),
            Arc::new(publisher),
        ));
        Self {
            broker,
            store,
            service,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        review_router(self.service.clone())
            .oneshot(request)
            .await
            .expect("router responds")
    }
}

fn create_request(username: &str, body: Value) -> Request<Body> {
    Request::post("/reviews")
        .header(
            USER_HEADER,
            json!({ "username": username, "role": "Guest" }).to_string(),
        )
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn created_review_is_stored_and_queued_for_later_consumers() {
    let harness = Harness::new();

    let response = harness
        .send(create_request(
            "alice",
            json!({ "type": "Accommodation", "entityId": "apt-7", "rating": 4, "comment": "Lovely" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = read_json_body(response).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let mut listener = harness
        .broker
        .consume_queue(ACCOMMODATION_REVIEW_CREATED)
        .await
        .expect("consume");
    let announced = tokio::time::timeout(Duration::from_secs(1), listener.next())
        .await
        .expect("event delivered")
        .expect("stream open");
    assert_eq!(announced.topic, ACCOMMODATION_REVIEW_CREATED);
    assert_eq!(announced.payload, Bytes::from_static(br#"{"rating":4}"#));

    let response = harness
        .send(
            Request::get(format!("/reviews/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    let review = read_json_body(response).await;
    assert_eq!(review["reviewerUsername"], "alice");
    assert_eq!(review["entityId"], "apt-7");
    assert_eq!(review["comment"], "Lovely");
}

#[tokio::test]
async fn broker_outage_fails_request_but_keeps_review() {
    let harness = Harness::new();
    harness.broker.set_available(false);

    let response = harness
        .send(create_request(
            "alice",
            json!({ "type": "Accommodation", "entityId": "apt-7", "rating": 2 }),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_json_body(response).await,
        json!({ "message": "Failed to emit accommodation-review-created event" })
    );
    assert_eq!(harness.store.len().await, 1);
    assert!(harness.broker.published().is_empty());
}

#[tokio::test]
async fn renamed_user_sees_their_reviews_under_the_new_name() {
    let harness = Harness::new();
    let response = harness
        .send(create_request(
            "bob",
            json!({ "type": "Host", "hostUsername": "henry", "rating": 5 }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let (stop, stopped) = watch::channel(false);
    let subscriber = UserEventSubscriber::new(harness.broker.clone(), harness.service.clone());
    let task = tokio::spawn(subscriber.run(stopped));

    let broker = &*harness.broker;
    wait_for(|| async move { broker.subscriber_count(USERNAME_UPDATED) == 1 }).await;

    broker
        .publish_fanout(
            USERNAME_UPDATED,
            Bytes::from_static(br#"{"oldUsername":"bob","newUsername":"robert"}"#),
        )
        .await
        .expect("publish rename");

    let service = &*harness.service;
    wait_for(|| async move {
        service
            .get_reviews_by_user(&LoggedUser::guest("robert"), &ReviewQuery::default())
            .await
            .map(|reviews| reviews.len() == 1)
            .unwrap_or(false)
    })
    .await;

    stop.send(true).expect("subscriber listening");
    task.await.expect("subscriber exits cleanly");
}
