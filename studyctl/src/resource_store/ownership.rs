use super::client::ResourceStore;
use crate::api::models::surveys::Survey;
use crate::errors::{Error, Result, UpstreamCall};
use tracing::{debug, instrument, warn};

/// Confirm the caller owns `survey_id` by asking the resource store for the caller's own surveys.
///
/// The result is never cached: every mutating request goes through here before it touches the
/// filesystem or the store.
#[instrument(skip(store, bearer))]
pub async fn verify_ownership(store: &dyn ResourceStore, bearer: &str, survey_id: &str) -> Result<Survey> {
    let surveys = store.list_owned_surveys(bearer).await.map_err(|e| {
        warn!(error = %e, "Could not list surveys owned by caller");
        Error::upstream(UpstreamCall::ListOwnedSurveys, e)
    })?;

    match surveys.into_iter().find(|survey| survey.id() == survey_id) {
        Some(survey) => {
            debug!("Ownership confirmed");
            Ok(survey)
        }
        None => Err(Error::Ownership {
            resource: "Survey".to_string(),
            id: survey_id.to_string(),
        }),
    }
}
