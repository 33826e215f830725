//! Review lifecycle: creation gated by reservation history, author-only edits,
//! public listings, and reconciliation with identity-system user events.
//!
//! HTTP handlers live in [`router`]; everything they call goes through
//! [`ReviewService`], which is generic over storage, the permission oracle,
//! and the event publisher so each can be swapped in tests.

pub mod domain;
pub mod mongo;
pub mod permissions;
pub mod query;
pub mod repository;
pub mod router;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests;

pub use domain::{
    LoggedUser, NewReview, Rating, Review, ReviewId, ReviewInput, ReviewPatch, ReviewTarget,
    ReviewType, Role, UserDeleted, UsernameChange,
};
pub use mongo::MongoReviewRepository;
pub use permissions::{AccommodationReviewCheck, HostReviewCheck, PermissionError, PermissionOracle};
pub use query::{ReviewFilter, ReviewQuery};
pub use repository::{RepositoryError, ReviewRepository};
pub use router::{review_router, CallerIdentity, USER_HEADER};
pub use service::{ErrorKind, ReviewService, ReviewServiceError};
pub use store::InMemoryReviewStore;
pub use validation::{validate_review, ValidatedReview, ValidationError};
