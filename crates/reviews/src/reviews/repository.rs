use async_trait::async_trait;

use super::domain::{NewReview, Review, ReviewId, ReviewPatch, UsernameChange};
use super::query::ReviewFilter;

/// Storage abstraction over the review document collection.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn get(&self, id: &ReviewId) -> Result<Option<Review>, RepositoryError>;
    async fn create(&self, review: NewReview) -> Result<ReviewId, RepositoryError>;
    async fn find_by_user(&self, filter: &ReviewFilter) -> Result<Vec<Review>, RepositoryError>;
    async fn find_by_accommodation(&self, entity_id: &str)
        -> Result<Vec<Review>, RepositoryError>;
    async fn find_by_host(&self, host_username: &str) -> Result<Vec<Review>, RepositoryError>;

    /// Apply the qualifying fields of `patch`. Returns whether the stored
    /// document actually changed.
    async fn update(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<bool, RepositoryError>;
    async fn delete(&self, id: &ReviewId) -> Result<bool, RepositoryError>;

    /// Rename reviewer and host references. Returns true if any document changed.
    async fn update_username(&self, change: &UsernameChange) -> Result<bool, RepositoryError>;

    /// Remove every review authored by or about `username`, returning the count.
    async fn delete_user(&self, username: &str) -> Result<u64, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("stored review is malformed: {0}")]
    Malformed(String),
}
