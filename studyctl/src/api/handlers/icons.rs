//! Study icon upload and the icon editor page.

use crate::{
    AppState,
    api::models::uploads::UploadResponse,
    auth::Bearer,
    errors::Result,
    resource_store::verify_ownership,
    storage::Retirement,
    views::ICON_PAGE,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse},
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// Replace a study's icon.
///
/// The upload is validated, ownership is confirmed, the file is committed to the sharded store and
/// the survey is written back with the new icon. The previous icon, if it was one of ours, is
/// removed afterwards.
#[instrument(skip_all, fields(survey_id = %survey_id))]
pub async fn upload_icon(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    bearer: Bearer,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let upload = state.uploads.file(multipart).await?;
    let survey = verify_ownership(state.resources.as_ref(), bearer.token(), &survey_id).await?;

    let stored = state.files.store(&upload.contents, upload.extension).await?;
    let path = stored.public_path();

    let (status, previous) = state.updater.set_icon(bearer.token(), survey, &path).await?;

    if let Some(previous) = previous.filter(|previous| *previous != path) {
        match state.files.remove_superseded(&previous).await {
            Retirement::Removed(old) => debug!(path = %old.display(), "Retired previous icon"),
            Retirement::Rejected => warn!(previous = %previous, "Previous icon path rejected, not removed"),
            outcome => debug!(previous = %previous, ?outcome, "Previous icon not removed"),
        }
    }

    info!(path = %path, bytes = upload.contents.len(), "Study icon uploaded");
    Ok((status, Json(UploadResponse { path })))
}

/// Store an image for an image-choice step. The survey itself is not changed: the editor keeps the
/// returned path in the step it is building and saves it with the rest of the task.
#[instrument(skip_all, fields(survey_id = %survey_id))]
pub async fn upload_image_choice(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    bearer: Bearer,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let upload = state.uploads.file(multipart).await?;
    verify_ownership(state.resources.as_ref(), bearer.token(), &survey_id).await?;

    let stored = state.files.store(&upload.contents, upload.extension).await?;
    let path = stored.public_path();

    info!(path = %path, "Image choice uploaded");
    Ok((StatusCode::CREATED, Json(UploadResponse { path })))
}

/// Icon editor page.
#[instrument(skip_all, fields(survey_id = %survey_id))]
pub async fn icon_page(State(state): State<AppState>, Path(survey_id): Path<String>, bearer: Bearer) -> Result<impl IntoResponse> {
    let survey = verify_ownership(state.resources.as_ref(), bearer.token(), &survey_id).await?;

    let body = state.renderer.render(ICON_PAGE, json!({ "study_id": survey.id(), "icon": survey.icon() }))?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Html(body),
    ))
}
