use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body sent when asking whether a guest may review an accommodation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationReviewCheck {
    pub accommodation_id: String,
    pub reviewer_username: String,
}

/// Body sent when asking whether a guest may review a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReviewCheck {
    pub host_username: String,
    pub reviewer_username: String,
}

/// Reservation-backed authority on who may leave which review. The policy
/// itself (completed stay, no earlier review) lives with the implementor.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn check_accommodation_review(
        &self,
        check: &AccommodationReviewCheck,
    ) -> Result<bool, PermissionError>;

    async fn check_host_review(&self, check: &HostReviewCheck) -> Result<bool, PermissionError>;
}

/// Failure to obtain an answer from the permission oracle.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("reservation service unreachable: {0}")]
    Transport(String),
    #[error("reservation service answered {status}")]
    Status { status: u16 },
    #[error("reservation service returned an unreadable body: {0}")]
    Decode(String),
}
