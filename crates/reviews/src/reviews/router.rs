use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, warn};

use super::domain::{LoggedUser, ReviewInput, ReviewPatch};
use super::permissions::PermissionOracle;
use super::query::ReviewQuery;
use super::repository::ReviewRepository;
use super::service::{ErrorKind, ReviewService, ReviewServiceError};
use crate::events::publisher::EventPublisher;

/// Header carrying the caller identity as a JSON object.
pub const USER_HEADER: &str = "user";

/// Router builder exposing the review endpoints under `/reviews`.
pub fn review_router<R, O, P>(service: Arc<ReviewService<R, O, P>>) -> Router
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    Router::new()
        .route("/reviews/health", get(health_handler))
        .route(
            "/reviews",
            get(list_mine_handler::<R, O, P>).post(create_handler::<R, O, P>),
        )
        .route("/reviews/", get(list_mine_handler::<R, O, P>))
        .route(
            "/reviews/accommodations/:entity_id",
            get(by_accommodation_handler::<R, O, P>),
        )
        .route(
            "/reviews/hosts/:username",
            get(by_host_handler::<R, O, P>),
        )
        .route(
            "/reviews/:id",
            get(get_handler::<R, O, P>)
                .put(update_handler::<R, O, P>)
                .delete(delete_handler::<R, O, P>),
        )
        .with_state(service)
}

/// Caller identity taken from the `user` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub LoggedUser);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| message_response(StatusCode::BAD_REQUEST, "User data not provided"))?;

        serde_json::from_slice::<LoggedUser>(raw.as_bytes())
            .map(CallerIdentity)
            .map_err(|err| {
                warn!(error = %err, "malformed user header");
                message_response(StatusCode::BAD_REQUEST, "User data not provided")
            })
    }
}

impl IntoResponse for ReviewServiceError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Internal {
            error!(error = %self, "review request failed");
        }
        message_response(kind.status(), &self.to_string())
    }
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// Empty bodies count as absent; anything else must be valid JSON.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|err| {
        warn!(error = %err, "malformed request body");
        message_response(StatusCode::BAD_REQUEST, "Malformed request body")
    })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hello, World!" }))
}

pub(crate) async fn get_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    Path(id): Path<String>,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    match service.get_review(&id).await {
        Ok(review) => Json(review).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn create_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    CallerIdentity(user): CallerIdentity,
    body: Bytes,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    let input = match parse_body::<ReviewInput>(&body) {
        Ok(input) => input,
        Err(rejection) => return rejection,
    };

    match service.create_review(&user, input.as_ref()).await {
        Ok(review) => (StatusCode::CREATED, Json(json!({ "id": review.id }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_mine_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    CallerIdentity(user): CallerIdentity,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    let query = ReviewQuery::from_pairs(pairs);
    match service.get_reviews_by_user(&user, &query).await {
        Ok(reviews) => Json(reviews).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn by_accommodation_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    Path(entity_id): Path<String>,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    match service.get_reviews_by_accommodation(&entity_id).await {
        Ok(reviews) => Json(reviews).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn by_host_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    Path(username): Path<String>,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    match service.get_reviews_by_host(&username).await {
        Ok(reviews) => Json(reviews).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn update_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    CallerIdentity(user): CallerIdentity,
    Path(id): Path<String>,
    body: Bytes,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    let patch = match parse_body::<ReviewPatch>(&body) {
        Ok(patch) => patch.unwrap_or_default(),
        Err(rejection) => return rejection,
    };

    match service.update_review(&user, &id, &patch).await {
        Ok(changed) => Json(changed).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn delete_handler<R, O, P>(
    State(service): State<Arc<ReviewService<R, O, P>>>,
    CallerIdentity(user): CallerIdentity,
    Path(id): Path<String>,
) -> Response
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    match service.delete_review(&user, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
