use super::domain::{Rating, ReviewInput, ReviewTarget, ReviewType};

/// Structurally valid review payload, before ownership is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReview {
    pub target: ReviewTarget,
    pub rating: Rating,
    pub comment: Option<String>,
}

/// Reasons a review payload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing review parameter")]
    MissingReview,
    #[error("Missing review type parameter")]
    MissingType,
    #[error("Missing review entityId parameter")]
    MissingEntityId,
    #[error("Missing review hostUsername parameter")]
    MissingHostUsername,
    #[error("Missing review rating parameter")]
    MissingRating,
    #[error("Invalid review rating parameter")]
    InvalidRating,
}

/// Check a review payload and lift it into a [`ValidatedReview`].
pub fn validate_review(input: Option<&ReviewInput>) -> Result<ValidatedReview, ValidationError> {
    let input = input.ok_or(ValidationError::MissingReview)?;
    let kind = input.kind.ok_or(ValidationError::MissingType)?;

    let target = match kind {
        ReviewType::Accommodation => ReviewTarget::Accommodation {
            entity_id: present(&input.entity_id).ok_or(ValidationError::MissingEntityId)?,
        },
        ReviewType::Host => ReviewTarget::Host {
            host_username: present(&input.host_username)
                .ok_or(ValidationError::MissingHostUsername)?,
        },
    };

    // Zero counts as unset.
    let rating = input
        .rating
        .filter(|rating| *rating != 0)
        .ok_or(ValidationError::MissingRating)?;
    let rating = Rating::new(rating).ok_or(ValidationError::InvalidRating)?;

    Ok(ValidatedReview {
        target,
        rating,
        comment: input.comment.clone(),
    })
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|value| !value.is_empty()).cloned()
}
