use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{
    NewReview, Rating, Review, ReviewId, ReviewPatch, ReviewTarget, ReviewType, UsernameChange,
};
use super::query::ReviewFilter;
use super::repository::{RepositoryError, ReviewRepository};
use crate::config::MongoConfig;

const DUPLICATE_KEY: i32 = 11000;

/// Review collection backed by MongoDB.
#[derive(Debug, Clone)]
pub struct MongoReviewRepository {
    collection: Collection<ReviewDocument>,
}

impl MongoReviewRepository {
    /// Connect and ping the database so a wrong URI fails at startup.
    pub async fn connect(config: &MongoConfig) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(unavailable)?;
        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(unavailable)?;
        info!(
            database = %config.database,
            collection = %config.collection,
            "connected to review store"
        );
        Ok(Self::from_collection(
            database.collection(&config.collection),
        ))
    }

    pub fn from_collection(collection: Collection<ReviewDocument>) -> Self {
        Self { collection }
    }

    async fn find_many(&self, filter: Document) -> Result<Vec<Review>, RepositoryError> {
        debug!(?filter, "querying reviews");
        let documents: Vec<ReviewDocument> = self
            .collection
            .find(filter)
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)?;
        documents.into_iter().map(Review::try_from).collect()
    }
}

#[async_trait]
impl ReviewRepository for MongoReviewRepository {
    async fn get(&self, id: &ReviewId) -> Result<Option<Review>, RepositoryError> {
        self.collection
            .find_one(id_filter(id))
            .await
            .map_err(unavailable)?
            .map(Review::try_from)
            .transpose()
    }

    async fn create(&self, review: NewReview) -> Result<ReviewId, RepositoryError> {
        let id = ReviewId::generate();
        let document = ReviewDocument::from(&review.into_review(id));
        self.collection
            .insert_one(&document)
            .await
            .map_err(|err| {
                if is_duplicate_key(&err) {
                    RepositoryError::Conflict
                } else {
                    unavailable(err)
                }
            })?;
        Ok(id)
    }

    async fn find_by_user(&self, filter: &ReviewFilter) -> Result<Vec<Review>, RepositoryError> {
        self.find_many(user_filter(filter)).await
    }

    async fn find_by_accommodation(
        &self,
        entity_id: &str,
    ) -> Result<Vec<Review>, RepositoryError> {
        self.find_many(doc! { "type": "Accommodation", "entityId": entity_id })
            .await
    }

    async fn find_by_host(&self, host_username: &str) -> Result<Vec<Review>, RepositoryError> {
        self.find_many(doc! { "type": "Host", "hostUsername": host_username })
            .await
    }

    async fn update(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<bool, RepositoryError> {
        let Some(update) = patch_update(patch) else {
            return Ok(false);
        };
        let result = self
            .collection
            .update_one(id_filter(id), update)
            .await
            .map_err(unavailable)?;
        Ok(result.modified_count > 0)
    }

    async fn delete(&self, id: &ReviewId) -> Result<bool, RepositoryError> {
        let result = self
            .collection
            .delete_one(id_filter(id))
            .await
            .map_err(unavailable)?;
        Ok(result.deleted_count > 0)
    }

    async fn update_username(&self, change: &UsernameChange) -> Result<bool, RepositoryError> {
        if change.old_username == change.new_username {
            return Ok(false);
        }

        let mut modified = 0;
        for (filter, update) in rename_updates(change) {
            let result = self
                .collection
                .update_many(filter, update)
                .await
                .map_err(unavailable)?;
            modified += result.modified_count;
        }
        Ok(modified > 0)
    }

    async fn delete_user(&self, username: &str) -> Result<u64, RepositoryError> {
        let result = self
            .collection
            .delete_many(user_purge_filter(username))
            .await
            .map_err(unavailable)?;
        Ok(result.deleted_count)
    }
}

/// Stored shape of a review. The review id doubles as the document `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReviewType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_username: Option<String>,
    pub reviewer_username: String,
    pub rating: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<&Review> for ReviewDocument {
    fn from(review: &Review) -> Self {
        Self {
            id: review.id.to_string(),
            kind: review.kind(),
            entity_id: review.entity_id().map(str::to_string),
            host_username: review.host_username().map(str::to_string),
            reviewer_username: review.reviewer_username.clone(),
            rating: i32::from(review.rating.value()),
            comment: review.comment.clone(),
        }
    }
}

impl TryFrom<ReviewDocument> for Review {
    type Error = RepositoryError;

    fn try_from(document: ReviewDocument) -> Result<Self, Self::Error> {
        let id = document
            .id
            .parse()
            .map_err(|_| RepositoryError::Malformed(format!("bad id {}", document.id)))?;
        let rating = Rating::new(i64::from(document.rating)).ok_or_else(|| {
            RepositoryError::Malformed(format!("review {id} has rating {}", document.rating))
        })?;
        let target = match document.kind {
            ReviewType::Accommodation => ReviewTarget::Accommodation {
                entity_id: document.entity_id.ok_or_else(|| {
                    RepositoryError::Malformed(format!("review {id} has no entityId"))
                })?,
            },
            ReviewType::Host => ReviewTarget::Host {
                host_username: document.host_username.ok_or_else(|| {
                    RepositoryError::Malformed(format!("review {id} has no hostUsername"))
                })?,
            },
        };

        Ok(Review {
            id,
            target,
            reviewer_username: document.reviewer_username,
            rating,
            comment: document.comment,
        })
    }
}

fn id_filter(id: &ReviewId) -> Document {
    doc! { "_id": id.to_string() }
}

fn user_filter(filter: &ReviewFilter) -> Document {
    let mut document = doc! { "reviewerUsername": &filter.reviewer_username };
    if let Some(entity_id) = &filter.entity_id {
        document.insert("entityId", entity_id);
    }
    if let Some(host_username) = &filter.host_username {
        document.insert("hostUsername", host_username);
    }
    document
}

/// `$set` document for the qualifying fields of `patch`, if any.
fn patch_update(patch: &ReviewPatch) -> Option<Document> {
    if patch.is_empty() {
        return None;
    }
    let mut set = Document::new();
    if let Some(rating) = patch.qualifying_rating() {
        set.insert("rating", i32::from(rating.value()));
    }
    if let Some(comment) = patch.qualifying_comment() {
        set.insert("comment", comment);
    }
    Some(doc! { "$set": set })
}

fn rename_updates(change: &UsernameChange) -> [(Document, Document); 2] {
    let UsernameChange {
        old_username,
        new_username,
    } = change;
    [
        (
            doc! { "reviewerUsername": old_username },
            doc! { "$set": { "reviewerUsername": new_username } },
        ),
        (
            doc! { "type": "Host", "hostUsername": old_username },
            doc! { "$set": { "hostUsername": new_username } },
        ),
    ]
}

fn user_purge_filter(username: &str) -> Document {
    doc! {
        "$or": [
            { "reviewerUsername": username },
            { "type": "Host", "hostUsername": username },
        ]
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn unavailable(err: MongoError) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}
