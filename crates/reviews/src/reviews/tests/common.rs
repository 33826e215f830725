use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::events::publisher::{EventPublisher, PublishError};
use crate::events::{BrokerError, ReviewCreated};
use crate::reviews::domain::{
    NewReview, Rating, Review, ReviewId, ReviewInput, ReviewPatch, ReviewTarget, ReviewType,
    UsernameChange,
};
use crate::reviews::permissions::{
    AccommodationReviewCheck, HostReviewCheck, PermissionError, PermissionOracle,
};
use crate::reviews::query::ReviewFilter;
use crate::reviews::repository::{RepositoryError, ReviewRepository};
use crate::reviews::{InMemoryReviewStore, ReviewService};

pub(super) type TestService = ReviewService<InMemoryReviewStore, StubOracle, RecordingPublisher>;

pub(super) fn build_service(
    oracle: StubOracle,
) -> (
    TestService,
    Arc<InMemoryReviewStore>,
    Arc<StubOracle>,
    Arc<RecordingPublisher>,
) {
    build_service_with_publisher(oracle, RecordingPublisher::default())
}

pub(super) fn build_service_with_publisher(
    oracle: StubOracle,
    publisher: RecordingPublisher,
) -> (
    TestService,
    Arc<InMemoryReviewStore>,
    Arc<StubOracle>,
    Arc<RecordingPublisher>,
) {
    let store = Arc::new(InMemoryReviewStore::new());
    let oracle = Arc::new(oracle);
    let publisher = Arc::new(publisher);
    let service = ReviewService::new(store.clone(), oracle.clone(), publisher.clone());
    (service, store, oracle, publisher)
}

pub(super) fn accommodation_input(entity_id: &str, rating: i64) -> ReviewInput {
    ReviewInput {
        kind: Some(ReviewType::Accommodation),
        entity_id: Some(entity_id.to_string()),
        rating: Some(rating),
        comment: Some("Spotless and quiet".to_string()),
        ..ReviewInput::default()
    }
}

pub(super) fn host_input(host_username: &str, rating: i64) -> ReviewInput {
    ReviewInput {
        kind: Some(ReviewType::Host),
        host_username: Some(host_username.to_string()),
        rating: Some(rating),
        ..ReviewInput::default()
    }
}

/// Stored accommodation review authored by `reviewer`.
pub(super) async fn seed_review(store: &InMemoryReviewStore, reviewer: &str) -> Review {
    let review = NewReview {
        target: ReviewTarget::Accommodation {
            entity_id: "apt-7".to_string(),
        },
        reviewer_username: reviewer.to_string(),
        rating: Rating::new(4).expect("valid rating"),
        comment: None,
    }
    .into_review(ReviewId::generate());
    store.insert(review.clone()).await.expect("seed review");
    review
}

/// Permission oracle with a fixed answer that counts how often it was asked.
pub(super) struct StubOracle {
    answer: Result<bool, u16>,
    calls: AtomicUsize,
}

impl StubOracle {
    pub(super) fn allowing() -> Self {
        Self::answering(Ok(true))
    }

    pub(super) fn denying() -> Self {
        Self::answering(Ok(false))
    }

    pub(super) fn failing() -> Self {
        Self::answering(Err(503))
    }

    fn answering(answer: Result<bool, u16>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<bool, PermissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .map_err(|status| PermissionError::Status { status })
    }
}

#[async_trait]
impl PermissionOracle for StubOracle {
    async fn check_accommodation_review(
        &self,
        _check: &AccommodationReviewCheck,
    ) -> Result<bool, PermissionError> {
        self.answer()
    }

    async fn check_host_review(&self, _check: &HostReviewCheck) -> Result<bool, PermissionError> {
        self.answer()
    }
}

#[derive(Default)]
pub(super) struct RecordingPublisher {
    events: Mutex<Vec<ReviewCreated>>,
    fail: bool,
}

impl RecordingPublisher {
    pub(super) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(super) fn events(&self) -> Vec<ReviewCreated> {
        self.events.lock().expect("publisher mutex poisoned").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ReviewCreated) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Broker(BrokerError::Publish(
                "broker offline".to_string(),
            )));
        }
        self.events
            .lock()
            .expect("publisher mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct UnavailableRepository;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

#[async_trait]
impl ReviewRepository for UnavailableRepository {
    async fn get(&self, _id: &ReviewId) -> Result<Option<Review>, RepositoryError> {
        offline()
    }

    async fn create(&self, _review: NewReview) -> Result<ReviewId, RepositoryError> {
        offline()
    }

    async fn find_by_user(&self, _filter: &ReviewFilter) -> Result<Vec<Review>, RepositoryError> {
        offline()
    }

    async fn find_by_accommodation(
        &self,
        _entity_id: &str,
    ) -> Result<Vec<Review>, RepositoryError> {
        offline()
    }

    async fn find_by_host(&self, _host_username: &str) -> Result<Vec<Review>, RepositoryError> {
        offline()
    }

    async fn update(&self, _id: &ReviewId, _patch: &ReviewPatch) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn delete(&self, _id: &ReviewId) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn update_username(&self, _change: &UsernameChange) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn delete_user(&self, _username: &str) -> Result<u64, RepositoryError> {
        offline()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
