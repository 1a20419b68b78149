//! Client source code for custom task steps.

use crate::{
    AppState,
    api::models::uploads::UploadResponse,
    auth::Bearer,
    dispatch::QueueMessage,
    errors::Result,
    resource_store::{ResourceUpdater, verify_ownership},
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::StatusCode,
};
use tracing::{info, instrument};

/// Store submitted client source for a step, record it in the step's settings and queue it for
/// transpiling.
///
/// With the default dispatch mode the response is only sent once the broker has confirmed the job.
#[instrument(skip_all, fields(survey_id = %survey_id, step_id = %step_id))]
pub async fn upload_client_source(
    State(state): State<AppState>,
    Path((survey_id, step_id)): Path<(String, String)>,
    bearer: Bearer,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let source = state.uploads.client_source(multipart).await?;
    let survey = verify_ownership(state.resources.as_ref(), bearer.token(), &survey_id).await?;
    ResourceUpdater::require_step(&survey, &step_id)?;

    let stored = state.files.store(source.code.as_bytes(), source.extension()).await?;
    let path = stored.public_path();

    state
        .updater
        .set_client_source(bearer.token(), survey, &step_id, &path)
        .await?;

    state
        .dispatcher
        .dispatch(QueueMessage {
            survey_id,
            step_id,
            path: path.clone(),
        })
        .await?;

    info!(path = %path, "Client source uploaded");
    Ok((StatusCode::CREATED, Json(UploadResponse { path })))
}
