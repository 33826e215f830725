use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::{error, info, warn};

use super::domain::{
    LoggedUser, NewReview, Review, ReviewId, ReviewInput, ReviewPatch, ReviewTarget,
    UsernameChange,
};
use super::permissions::{
    AccommodationReviewCheck, HostReviewCheck, PermissionError, PermissionOracle,
};
use super::query::{ReviewFilter, ReviewQuery};
use super::repository::{RepositoryError, ReviewRepository};
use super::validation::{validate_review, ValidationError};
use crate::events::publisher::{EventPublisher, PublishError};
use crate::events::subscriber::UserEventHandler;
use crate::events::{ReviewCreated, UserEvent};

/// Service composing validation, the permission oracle, the review store, and
/// the event publisher.
pub struct ReviewService<R, O, P> {
    repository: Arc<R>,
    permissions: Arc<O>,
    events: Arc<P>,
}

impl<R, O, P> ReviewService<R, O, P>
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(repository: Arc<R>, permissions: Arc<O>, events: Arc<P>) -> Self {
        Self {
            repository,
            permissions,
            events,
        }
    }

    pub async fn get_review(&self, id: &str) -> Result<Review, ReviewServiceError> {
        info!(%id, "getting review");
        let id = parse_id(id)?;
        self.repository
            .get(&id)
            .await?
            .ok_or(ReviewServiceError::NotFound)
    }

    /// Store a new review written by `user`. The review is persisted before the
    /// creation event is emitted; an emission failure is reported as an error
    /// even though the review stays stored.
    pub async fn create_review(
        &self,
        user: &LoggedUser,
        input: Option<&ReviewInput>,
    ) -> Result<Review, ReviewServiceError> {
        info!(username = %user.username, "creating review");
        require_guest(user, "Only guest can leave review")?;
        let validated = validate_review(input)?;

        let allowed = match &validated.target {
            ReviewTarget::Accommodation { entity_id } => {
                let check = AccommodationReviewCheck {
                    accommodation_id: entity_id.clone(),
                    reviewer_username: user.username.clone(),
                };
                self.permissions.check_accommodation_review(&check).await
            }
            ReviewTarget::Host { host_username } => {
                let check = HostReviewCheck {
                    host_username: host_username.clone(),
                    reviewer_username: user.username.clone(),
                };
                self.permissions.check_host_review(&check).await
            }
        }
        .map_err(|err| {
            error!(error = %err, "permission check failed");
            ReviewServiceError::Permission(err)
        })?;

        let kind = validated.target.kind();
        if !allowed {
            warn!(username = %user.username, kind = kind.label(), "review not permitted");
            return Err(ReviewServiceError::Forbidden(format!(
                "User does not have permission to leave review for this {}",
                kind.label()
            )));
        }

        let new_review = NewReview {
            target: validated.target,
            reviewer_username: user.username.clone(),
            rating: validated.rating,
            comment: validated.comment,
        };
        let id = self.repository.create(new_review.clone()).await?;
        let review = new_review.into_review(id);
        info!(%id, kind = kind.label(), "review created");

        let event = ReviewCreated {
            kind,
            rating: review.rating,
        };
        if let Err(source) = self.events.publish(event).await {
            error!(%id, topic = event.topic(), error = %source, "failed to emit review event");
            return Err(ReviewServiceError::EventEmission {
                topic: event.topic(),
                source,
            });
        }

        Ok(review)
    }

    /// Reviews written by `user`, optionally narrowed by accommodation or host.
    pub async fn get_reviews_by_user(
        &self,
        user: &LoggedUser,
        query: &ReviewQuery,
    ) -> Result<Vec<Review>, ReviewServiceError> {
        info!(username = %user.username, ?query, "getting reviews by user");
        require_username(user)?;
        let filter = ReviewFilter::for_user(&user.username, query);
        Ok(self.repository.find_by_user(&filter).await?)
    }

    pub async fn get_reviews_by_accommodation(
        &self,
        entity_id: &str,
    ) -> Result<Vec<Review>, ReviewServiceError> {
        info!(%entity_id, "getting reviews by accommodation");
        if entity_id.is_empty() {
            return Err(ReviewServiceError::bad_request("Missing id parameter"));
        }
        Ok(self.repository.find_by_accommodation(entity_id).await?)
    }

    pub async fn get_reviews_by_host(
        &self,
        host_username: &str,
    ) -> Result<Vec<Review>, ReviewServiceError> {
        info!(%host_username, "getting reviews by host");
        if host_username.is_empty() {
            return Err(ReviewServiceError::bad_request("Missing username parameter"));
        }
        Ok(self.repository.find_by_host(host_username).await?)
    }

    /// Change rating and/or comment of a review authored by `user`.
    pub async fn update_review(
        &self,
        user: &LoggedUser,
        id: &str,
        patch: &ReviewPatch,
    ) -> Result<bool, ReviewServiceError> {
        info!(%id, username = %user.username, "updating review");
        require_guest(user, "Only guest can update review")?;
        let review = self.owned_review(user, id, "update").await?;
        Ok(self.repository.update(&review.id, patch).await?)
    }

    pub async fn delete_review(
        &self,
        user: &LoggedUser,
        id: &str,
    ) -> Result<bool, ReviewServiceError> {
        info!(%id, username = %user.username, "deleting review");
        require_guest(user, "Only guest can delete review")?;
        let review = self.owned_review(user, id, "delete").await?;
        Ok(self.repository.delete(&review.id).await?)
    }

    /// Apply an identity-system rename to reviewer and host references.
    pub async fn update_username(
        &self,
        change: &UsernameChange,
    ) -> Result<bool, ReviewServiceError> {
        info!(old = %change.old_username, new = %change.new_username, "updating username");
        if change.old_username.is_empty() || change.new_username.is_empty() {
            return Err(ReviewServiceError::bad_request("Missing username parameter"));
        }
        Ok(self.repository.update_username(change).await?)
    }

    /// Remove every review written by or about a deleted user.
    pub async fn delete_user(&self, username: &str) -> Result<u64, ReviewServiceError> {
        info!(%username, "deleting reviews of user");
        if username.is_empty() {
            return Err(ReviewServiceError::bad_request("Missing username parameter"));
        }
        let removed = self.repository.delete_user(username).await?;
        info!(%username, removed, "reviews of deleted user removed");
        Ok(removed)
    }

    async fn owned_review(
        &self,
        user: &LoggedUser,
        id: &str,
        action: &str,
    ) -> Result<Review, ReviewServiceError> {
        let id = parse_id(id)?;
        let review = self.repository.get(&id).await?.ok_or_else(|| {
            warn!(%id, "review not found");
            ReviewServiceError::bad_request("Review not found")
        })?;

        if !review.is_authored_by(&user.username) {
            warn!(%id, username = %user.username, "caller is not the review author");
            return Err(ReviewServiceError::Forbidden(format!(
                "User does not have permission to {action} review"
            )));
        }
        Ok(review)
    }
}

#[async_trait]
impl<R, O, P> UserEventHandler for ReviewService<R, O, P>
where
    R: ReviewRepository + 'static,
    O: PermissionOracle + 'static,
    P: EventPublisher + 'static,
{
    type Error = ReviewServiceError;

    async fn handle(&self, event: UserEvent) -> Result<(), Self::Error> {
        match event {
            UserEvent::UsernameUpdated(change) => {
                self.update_username(&change).await?;
            }
            UserEvent::UserDeleted(deleted) => {
                self.delete_user(&deleted.username).await?;
            }
        }
        Ok(())
    }
}

fn require_guest(user: &LoggedUser, message: &str) -> Result<(), ReviewServiceError> {
    if !user.is_guest() {
        warn!(username = %user.username, role = ?user.role, "{message}");
        return Err(ReviewServiceError::Forbidden(message.to_string()));
    }
    require_username(user)
}

fn require_username(user: &LoggedUser) -> Result<(), ReviewServiceError> {
    if user.username.is_empty() {
        return Err(ReviewServiceError::bad_request(
            "Missing logged user username parameter",
        ));
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<ReviewId, ReviewServiceError> {
    if raw.is_empty() {
        return Err(ReviewServiceError::bad_request("Missing id parameter"));
    }
    raw.parse()
        .map_err(|_| ReviewServiceError::bad_request("Invalid review id"))
}

/// Coarse outcome class, mapped one-to-one onto HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error raised by the review service.
#[derive(Debug, thiserror::Error)]
pub enum ReviewServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Review not found")]
    NotFound,
    #[error("Unable to verify review permission: {0}")]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("Failed to emit {topic} event")]
    EventEmission {
        topic: &'static str,
        #[source]
        source: PublishError,
    },
}

impl ReviewServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewServiceError::Validation(_) | ReviewServiceError::BadRequest(_) => {
                ErrorKind::BadRequest
            }
            ReviewServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ReviewServiceError::NotFound => ErrorKind::NotFound,
            ReviewServiceError::Permission(_)
            | ReviewServiceError::Repository(_)
            | ReviewServiceError::EventEmission { .. } => ErrorKind::Internal,
        }
    }
}
