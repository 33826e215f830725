use serde::{Deserialize, Serialize};

/// Optional narrowing supplied on the "my reviews" listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery {
    pub entity_id: Option<String>,
    pub host_username: Option<String>,
}

impl ReviewQuery {
    /// Build a query from raw query-string pairs. The first occurrence of a key
    /// wins, even when empty, and each value is cut at its first `/`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::default();
        let (mut seen_entity, mut seen_host) = (false, false);
        for (key, value) in pairs {
            let (slot, seen) = match key.as_ref() {
                "entityId" => (&mut query.entity_id, &mut seen_entity),
                "hostUsername" => (&mut query.host_username, &mut seen_host),
                _ => continue,
            };
            if !*seen {
                *seen = true;
                *slot = normalize(value.as_ref());
            }
        }
        query
    }
}

fn normalize(raw: &str) -> Option<String> {
    let head = raw.split('/').next().unwrap_or_default();
    if head.is_empty() {
        None
    } else {
        Some(head.to_string())
    }
}

/// Store-level filter for reviews written by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewFilter {
    pub reviewer_username: String,
    pub entity_id: Option<String>,
    pub host_username: Option<String>,
}

impl ReviewFilter {
    pub fn for_user(username: &str, query: &ReviewQuery) -> Self {
        Self {
            reviewer_username: username.to_string(),
            entity_id: query.entity_id.clone(),
            host_username: query.host_username.clone(),
        }
    }

    pub fn matches(&self, review: &super::Review) -> bool {
        review.reviewer_username == self.reviewer_username
            && self
                .entity_id
                .as_deref()
                .map_or(true, |entity_id| review.entity_id() == Some(entity_id))
            && self
                .host_username
                .as_deref()
                .map_or(true, |host| review.host_username() == Some(host))
    }
}
