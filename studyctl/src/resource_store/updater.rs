use super::client::ResourceStore;
use crate::api::models::surveys::Survey;
use crate::errors::{Error, Result, UpstreamCall};
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

/// Settings key under which a step's client source path is stored
pub const CLIENT_SETTING: &str = "client";

/// Applies a stored file to a survey and writes the whole document back.
#[derive(Clone)]
pub struct ResourceUpdater {
    store: Arc<dyn ResourceStore>,
}

impl ResourceUpdater {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Fails with a validation error when `step_id` is not a step of the survey's task. Call this
    /// before storing anything.
    pub fn require_step(survey: &Survey, step_id: &str) -> Result<()> {
        if survey.has_step(step_id) {
            Ok(())
        } else {
            Err(Error::validation(format!("unknown step {step_id}")))
        }
    }

    /// Point the survey's icon at `path` and persist. Returns the previous icon reference.
    #[instrument(skip_all, fields(survey_id = %survey.id(), path = %path))]
    pub async fn set_icon(&self, bearer: &str, mut survey: Survey, path: &str) -> Result<(StatusCode, Option<String>)> {
        let previous = survey.set_icon(path);
        let status = self.persist(bearer, &survey).await?;
        info!(status = %status, "Survey icon updated");
        Ok((status, previous))
    }

    /// Record `path` as the client source of the step, creating its settings if needed, and
    /// persist.
    #[instrument(skip_all, fields(survey_id = %survey.id(), step_id = %step_id, path = %path))]
    pub async fn set_client_source(&self, bearer: &str, mut survey: Survey, step_id: &str, path: &str) -> Result<StatusCode> {
        if !survey.set_step_setting(step_id, CLIENT_SETTING, Value::String(path.to_string())) {
            return Err(Error::validation(format!("unknown step {step_id}")));
        }

        let status = self.persist(bearer, &survey).await?;
        info!(status = %status, "Step client source updated");
        Ok(status)
    }

    async fn persist(&self, bearer: &str, survey: &Survey) -> Result<StatusCode> {
        self.store
            .replace_survey(bearer, survey)
            .await
            .map_err(|e| Error::upstream(UpstreamCall::ReplaceSurvey, e))
    }
}
