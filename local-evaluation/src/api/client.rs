use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, warn};

use crate::api::errors::FlagError;
use crate::api::types::{RemoteFlagsRequest, RemoteFlagsResponse};
use crate::config::Config;
use crate::flags::flag_models::LocalEvaluationResponse;

const USER_AGENT: &str = concat!("posthog-local-evaluation/", env!("CARGO_PKG_VERSION"));

/// The two calls the evaluation coordinator makes to the flags service.
#[async_trait]
pub trait FlagsApiClient: Send + Sync {
    /// Every flag, cohort and group type mapping of the project.
    async fn fetch_local_evaluation_definitions(
        &self,
    ) -> Result<LocalEvaluationResponse, FlagError>;

    /// Server-side evaluation of every flag for one identity.
    async fn fetch_remote_flags(
        &self,
        request: &RemoteFlagsRequest,
    ) -> Result<RemoteFlagsResponse, FlagError>;
}

pub struct HttpFlagsApiClient {
    client: reqwest::Client,
    host: String,
    project_api_key: String,
    personal_api_key: String,
}

impl HttpFlagsApiClient {
    pub fn new(config: &Config) -> Result<Self, FlagError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| FlagError::Internal(format!("failed to build http client: {e}")))?;

        Ok(HttpFlagsApiClient {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            project_api_key: config.project_api_key.clone(),
            personal_api_key: config.personal_api_key.clone(),
        })
    }

    fn local_evaluation_url(&self) -> String {
        format!("{}/api/feature_flag/local_evaluation?send_cohorts", self.host)
    }

    fn flags_url(&self) -> String {
        format!("{}/flags/?v=2", self.host)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FlagError> {
    let status = response.status();
    if !status.is_success() {
        warn!("Flags service responded with status {}", status);
        return Err(FlagError::ApiError(status.as_u16()));
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl FlagsApiClient for HttpFlagsApiClient {
    async fn fetch_local_evaluation_definitions(
        &self,
    ) -> Result<LocalEvaluationResponse, FlagError> {
        if self.personal_api_key.is_empty() {
            return Err(FlagError::MissingPersonalApiKey);
        }

        let response = self
            .client
            .get(self.local_evaluation_url())
            .query(&[("token", self.project_api_key.as_str())])
            .bearer_auth(&self.personal_api_key)
            .send()
            .await?;

        let definitions: LocalEvaluationResponse = read_json(response).await?;
        debug!(
            "Fetched {} flag definitions and {} cohorts",
            definitions.flags.len(),
            definitions.cohorts.len()
        );
        Ok(definitions)
    }

    async fn fetch_remote_flags(
        &self,
        request: &RemoteFlagsRequest,
    ) -> Result<RemoteFlagsResponse, FlagError> {
        let response = self
            .client
            .post(self.flags_url())
            .json(request)
            .send()
            .await?;

        let flags: RemoteFlagsResponse = read_json(response).await?;
        if flags.is_quota_limited() {
            warn!("Feature flags are quota limited for this project");
            return Err(FlagError::QuotaLimited);
        }
        if flags.errors_while_computing_flags {
            debug!(
                "Flags service reported errors while computing flags for request {:?}",
                flags.request_id
            );
        }
        Ok(flags)
    }
}
