use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::domain::{NewReview, Review, ReviewId, ReviewPatch, ReviewTarget, UsernameChange};
use super::query::ReviewFilter;
use super::repository::{RepositoryError, ReviewRepository};

/// In-process review collection. Documents keep insertion order so listings
/// come back oldest first.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReviewStore {
    documents: Arc<RwLock<Vec<Review>>>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Insert a fully formed document, keeping its id. Used to seed fixtures.
    pub async fn insert(&self, review: Review) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        if documents.iter().any(|existing| existing.id == review.id) {
            return Err(RepositoryError::Conflict);
        }
        documents.push(review);
        Ok(())
    }

    async fn select<F>(&self, predicate: F) -> Vec<Review>
    where
        F: Fn(&Review) -> bool,
    {
        self.documents
            .read()
            .await
            .iter()
            .filter(|review| predicate(review))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReviewRepository for InMemoryReviewStore {
    async fn get(&self, id: &ReviewId) -> Result<Option<Review>, RepositoryError> {
        let documents = self.documents.read().await;
        Ok(documents.iter().find(|review| review.id == *id).cloned())
    }

    async fn create(&self, review: NewReview) -> Result<ReviewId, RepositoryError> {
        let id = ReviewId::generate();
        self.insert(review.into_review(id)).await?;
        Ok(id)
    }

    async fn find_by_user(&self, filter: &ReviewFilter) -> Result<Vec<Review>, RepositoryError> {
        Ok(self.select(|review| filter.matches(review)).await)
    }

    async fn find_by_accommodation(
        &self,
        entity_id: &str,
    ) -> Result<Vec<Review>, RepositoryError> {
        Ok(self
            .select(|review| review.entity_id() == Some(entity_id))
            .await)
    }

    async fn find_by_host(&self, host_username: &str) -> Result<Vec<Review>, RepositoryError> {
        Ok(self
            .select(|review| review.host_username() == Some(host_username))
            .await)
    }

    async fn update(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<bool, RepositoryError> {
        if patch.is_empty() {
            return Ok(false);
        }

        let mut documents = self.documents.write().await;
        let Some(review) = documents.iter_mut().find(|review| review.id == *id) else {
            return Ok(false);
        };

        let mut modified = false;
        if let Some(rating) = patch.qualifying_rating() {
            modified |= review.rating != rating;
            review.rating = rating;
        }
        if let Some(comment) = patch.qualifying_comment() {
            modified |= review.comment.as_deref() != Some(comment);
            review.comment = Some(comment.to_string());
        }
        Ok(modified)
    }

    async fn delete(&self, id: &ReviewId) -> Result<bool, RepositoryError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|review| review.id != *id);
        Ok(documents.len() < before)
    }

    async fn update_username(&self, change: &UsernameChange) -> Result<bool, RepositoryError> {
        let UsernameChange {
            old_username,
            new_username,
        } = change;
        if old_username == new_username {
            return Ok(false);
        }

        let mut documents = self.documents.write().await;
        let mut modified = 0usize;
        for review in documents.iter_mut() {
            if review.reviewer_username == *old_username {
                review.reviewer_username = new_username.clone();
                modified += 1;
            }
            if let ReviewTarget::Host { host_username } = &mut review.target {
                if *host_username == *old_username {
                    *host_username = new_username.clone();
                    modified += 1;
                }
            }
        }
        Ok(modified > 0)
    }

    async fn delete_user(&self, username: &str) -> Result<u64, RepositoryError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|review| {
            review.reviewer_username != username && review.host_username() != Some(username)
        });
        Ok((before - documents.len()) as u64)
    }
}
