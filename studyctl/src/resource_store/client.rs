//! HTTP access to the remote resource store.

use crate::api::models::surveys::Survey;
use crate::config::ResourceStoreConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Schema version requested when listing surveys
pub const SCHEMA_VERSION: &str = "1.0";
const API_PREFIX: &str = "v1.0.M1/";

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request to resource store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resource store responded with {status}")]
    Status { status: StatusCode, body: String },

    #[error("could not parse resource store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid resource store URL: {0}")]
    Url(#[from] url::ParseError),
}

/// The operations this server needs from the resource store. Every call carries the caller's
/// own bearer credential; the store is the sole authority on what that caller owns.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// `GET /v1.0.M1/surveys/my?schema_version=1.0`
    async fn list_owned_surveys(&self, bearer: &str) -> Result<Vec<Survey>, UpstreamError>;

    /// `POST /v1.0.M1/surveys` with the full document. Returns the store's (successful) status.
    async fn replace_survey(&self, bearer: &str, survey: &Survey) -> Result<StatusCode, UpstreamError>;
}

/// The concrete implementation of `ResourceStore`, over `reqwest`.
pub struct ReqwestResourceStore {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl ReqwestResourceStore {
    pub fn new(config: &ResourceStoreConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        Ok(ensure_slash(&self.base_url).join(API_PREFIX)?.join(path)?)
    }
}

/// Makes sure a url has a trailing slash.
///
/// Joining `/hello` and `world` gives `/world`, but `/hello/` and `world` gives `/hello/world`.
/// Call this before calling `.join`.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

#[async_trait]
impl ResourceStore for ReqwestResourceStore {
    #[instrument(skip_all)]
    async fn list_owned_surveys(&self, bearer: &str) -> Result<Vec<Survey>, UpstreamError> {
        let mut url = self.endpoint("surveys/my")?;
        url.query_pairs_mut().append_pair("schema_version", SCHEMA_VERSION);

        debug!(url = %url, "Listing surveys owned by caller");
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(bearer)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        let body = response.text().await?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        let listed = entries.len();

        // One odd document must not hide the caller's other surveys
        let surveys: Vec<Survey> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(survey) => Some(survey),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable survey in listing");
                    None
                }
            })
            .collect();
        debug!(count = surveys.len(), listed, "Got surveys");
        Ok(surveys)
    }

    #[instrument(skip_all, fields(survey_id = %survey.id()))]
    async fn replace_survey(&self, bearer: &str, survey: &Survey) -> Result<StatusCode, UpstreamError> {
        let url = self.endpoint("surveys")?;

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(bearer)
            .json(survey)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        debug!(status = %status, "Survey replaced");
        Ok(status)
    }
}
