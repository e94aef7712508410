use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const POINTS_PATH: &str = "api/users/points";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("reqwest error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed: {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid reward sink URL: {0}")]
    InvalidUrl(String),
}

/// The signed-in player, handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Service of record for player coin balances.
#[async_trait]
pub trait RewardSink: Send + Sync {
    /// Credits `points` and returns the updated balance.
    async fn credit(&self, user: &CurrentUser, points: u64) -> Result<u64, SinkError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditRequest<'a> {
    user_id: &'a str,
    points: u64,
}

#[derive(Deserialize)]
struct CreditResponse {
    #[serde(alias = "balance", alias = "total")]
    points: u64,
}

/// `POST {base}/api/users/points`. One attempt, no retry.
#[derive(Clone)]
pub struct HttpRewardSink {
    client: Client,
    endpoint: Url,
}

impl HttpRewardSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let mut base =
            Url::parse(base_url).map_err(|err| SinkError::InvalidUrl(format!("{base_url}: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SinkError::InvalidUrl(format!(
                "{base_url}: expected http or https"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(POINTS_PATH)
            .map_err(|err| SinkError::InvalidUrl(format!("{base_url}: {err}")))?;

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RewardSink for HttpRewardSink {
    async fn credit(&self, user: &CurrentUser, points: u64) -> Result<u64, SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&CreditRequest {
                user_id: &user.id,
                points,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }

        let body: CreditResponse = response.json().await?;
        Ok(body.points)
    }
}
