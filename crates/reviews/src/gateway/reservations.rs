use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ReservationsConfig;
use crate::reviews::permissions::{
    AccommodationReviewCheck, HostReviewCheck, PermissionError, PermissionOracle,
};

/// HTTP client for the reservation service's review-eligibility endpoints.
#[derive(Debug, Clone)]
pub struct ReservationsClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReservationsClient {
    pub fn new(config: &ReservationsConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn ask<T>(&self, path: &str, body: &T) -> Result<bool, PermissionError>
    where
        T: Serialize + Sync,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "checking review permission");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| PermissionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "reservation service rejected permission check");
            return Err(PermissionError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PermissionError::Transport(err.to_string()))?;
        let allowed = interpret_answer(&bytes)?;
        debug!(%url, allowed, "permission check answered");
        Ok(allowed)
    }
}

#[async_trait]
impl PermissionOracle for ReservationsClient {
    async fn check_accommodation_review(
        &self,
        check: &AccommodationReviewCheck,
    ) -> Result<bool, PermissionError> {
        self.ask("/review/accommodation", check).await
    }

    async fn check_host_review(&self, check: &HostReviewCheck) -> Result<bool, PermissionError> {
        self.ask("/review/host", check).await
    }
}

/// Reduce the reservation service's JSON answer to a yes/no using JSON
/// truthiness. An empty body means no.
pub(crate) fn interpret_answer(body: &[u8]) -> Result<bool, PermissionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(false);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|err| PermissionError::Decode(err.to_string()))?;

    Ok(match value {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}
