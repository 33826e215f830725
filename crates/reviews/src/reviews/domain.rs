use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned identifier of a stored review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub Uuid);

impl ReviewId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ReviewId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(Self)
    }
}

/// Which side of a stay is being reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewType {
    Accommodation,
    Host,
}

impl ReviewType {
    pub fn label(self) -> &'static str {
        match self {
            ReviewType::Accommodation => "accommodation",
            ReviewType::Host => "host",
        }
    }
}

/// The reviewed subject. Carrying the identifier inside the variant keeps
/// `entityId` and `hostUsername` mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReviewTarget {
    Accommodation {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
    Host {
        #[serde(rename = "hostUsername")]
        host_username: String,
    },
}

impl ReviewTarget {
    pub fn kind(&self) -> ReviewType {
        match self {
            ReviewTarget::Accommodation { .. } => ReviewType::Accommodation,
            ReviewTarget::Host { .. } => ReviewType::Host,
        }
    }
}

/// Star rating constrained to `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            u8::try_from(value).ok().map(Self)
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rating::new(value).ok_or_else(|| format!("rating {value} is outside 1..=5"))
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

/// Persisted review document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    #[serde(flatten)]
    pub target: ReviewTarget,
    pub reviewer_username: String,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Review {
    pub fn kind(&self) -> ReviewType {
        self.target.kind()
    }

    pub fn entity_id(&self) -> Option<&str> {
        match &self.target {
            ReviewTarget::Accommodation { entity_id } => Some(entity_id),
            ReviewTarget::Host { .. } => None,
        }
    }

    pub fn host_username(&self) -> Option<&str> {
        match &self.target {
            ReviewTarget::Host { host_username } => Some(host_username),
            ReviewTarget::Accommodation { .. } => None,
        }
    }

    pub fn is_authored_by(&self, username: &str) -> bool {
        self.reviewer_username == username
    }
}

/// Review ready to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub target: ReviewTarget,
    pub reviewer_username: String,
    pub rating: Rating,
    pub comment: Option<String>,
}

impl NewReview {
    pub fn into_review(self, id: ReviewId) -> Review {
        Review {
            id,
            target: self.target,
            reviewer_username: self.reviewer_username,
            rating: self.rating,
            comment: self.comment,
        }
    }
}

/// Raw review payload as received from a client. Every field is optional so
/// that validation, not deserialization, decides what is missing. Any
/// `reviewerUsername` or `id` the client sends is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    #[serde(default, rename = "type")]
    pub kind: Option<ReviewType>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub host_username: Option<String>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Fields an author may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPatch {
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ReviewPatch {
    /// Rating to apply, if one was supplied and is within range.
    pub fn qualifying_rating(&self) -> Option<Rating> {
        self.rating.and_then(Rating::new)
    }

    /// Comment to apply, if one was supplied and is non-empty.
    pub fn qualifying_comment(&self) -> Option<&str> {
        self.comment.as_deref().filter(|comment| !comment.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.qualifying_rating().is_none() && self.qualifying_comment().is_none()
    }
}

/// Caller role as asserted by the upstream identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Guest,
    Host,
}

/// Authenticated caller on whose behalf an operation runs. A missing or
/// unrecognised role parses as `None` and is refused by role checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedUser {
    #[serde(default)]
    pub username: String,
    #[serde(
        default,
        deserialize_with = "lenient_role",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
}

impl LoggedUser {
    pub fn guest(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Some(Role::Guest),
        }
    }

    pub fn host(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Some(Role::Host),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.role == Some(Role::Guest)
    }
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// Payload of the `username-updated` fanout event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameChange {
    #[serde(default)]
    pub old_username: String,
    #[serde(default)]
    pub new_username: String,
}

/// Payload of the `user-deleted` fanout event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeleted {
    #[serde(default)]
    pub username: String,
}
