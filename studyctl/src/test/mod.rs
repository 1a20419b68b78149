pub mod utils;

use crate::config::DispatchMode;
use crate::dispatch::QueueMessage;
use crate::errors::ErrorBody;
use crate::storage::{FILES_DIR, STAGING_DIR};
use axum::http::StatusCode;
use serde_json::{Value, json};
use utils::{
    BEARER_COOKIE, RecordingQueue, create_test_app, create_test_app_with, file_form, files_under, mount_owned_surveys,
    mount_replace_survey, source_form,
};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image";

fn is_shard_path(path: &str, extension: &str) -> bool {
    let parts: Vec<&str> = path.split('/').collect();
    let hex = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_hexdigit());
    parts.len() == 5
        && parts[0].is_empty()
        && parts[1] == "files"
        && hex(parts[2])
        && hex(parts[3])
        && parts[4].ends_with(extension)
        && parts[4].replace('-', "").starts_with(&format!("{}{}", parts[2], parts[3]))
}

fn survey_with_steps(id: &str, icon: Value) -> Value {
    json!({
        "id": id,
        "title": "Gait study",
        "icon": icon,
        "task": {"steps": [{"id": "ST1", "type": "custom"}]}
    })
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_stores_file_and_updates_survey() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 201, 1).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let path = body["path"].as_str().expect("path in response").to_string();
    assert!(is_shard_path(&path, ".png"), "unexpected path {path}");

    let on_disk = app.root().join(path.trim_start_matches('/'));
    assert_eq!(std::fs::read(on_disk).unwrap(), PNG);

    let listings = app.received("GET").await;
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].url.query(), Some("schema_version=1.0"));
    assert_eq!(listings[0].headers.get("authorization").unwrap(), "Bearer T");

    let replaced = app.received("POST").await;
    let sent: Value = serde_json::from_slice(&replaced[0].body).unwrap();
    assert_eq!(sent["id"], "S1");
    assert_eq!(sent["icon"], path);
    assert_eq!(sent["title"], "Gait study");

    assert!(files_under(&app.root().join(STAGING_DIR)).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_for_unowned_survey_is_forbidden() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S2/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Survey not owned by user");
    assert_eq!(body.caused_by.as_deref(), Some("Survey not found"));
    assert_eq!(body.kind.as_deref(), Some("OwnershipError"));

    assert!(!app.root().join(FILES_DIR).exists());
    assert!(files_under(app.root()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_ignores_malformed_sibling_survey() {
    let app = create_test_app().await;
    mount_owned_surveys(
        &app.resources,
        json!([
            survey_with_steps("S1", Value::Null),
            {"id": "S9", "task": {"steps": null}},
            {"title": "draft without id"}
        ]),
    )
    .await;
    mount_replace_survey(&app.resources, 201, 1).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::CREATED);
    let replaced = app.received("POST").await;
    let sent: Value = serde_json::from_slice(&replaced[0].body).unwrap();
    assert_eq!(sent["id"], "S1");
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_sends_back_explicit_nulls() {
    let app = create_test_app().await;
    mount_owned_surveys(
        &app.resources,
        json!([{
            "id": "S1",
            "icon": null,
            "settings": null,
            "consent_document": null,
            "task": {"steps": [{"id": "ST1", "settings": null}]}
        }]),
    )
    .await;
    mount_replace_survey(&app.resources, 201, 1).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::CREATED);
    let path = response.json::<Value>()["path"].as_str().unwrap().to_string();

    let replaced = app.received("POST").await;
    let sent: Value = serde_json::from_slice(&replaced[0].body).unwrap();
    assert_eq!(
        sent,
        json!({
            "id": "S1",
            "icon": path,
            "settings": null,
            "consent_document": null,
            "task": {"steps": [{"id": "ST1", "settings": null}]}
        })
    );
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_rejects_unsupported_type() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("text/plain", b"hello"))
        .await;

    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "unsupported type");
    assert_eq!(body.kind.as_deref(), Some("ValidationError"));

    assert!(files_under(app.root()).is_empty());
    assert!(app.received("GET").await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_without_file_field() {
    let app = create_test_app().await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(axum_test::multipart::MultipartForm::new().add_text("caption", "no file here"))
        .await;

    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "missing file");
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_retires_previous_icon() {
    let app = create_test_app().await;
    let old = app.root().join("files/00/11/old.png");
    std::fs::create_dir_all(old.parent().unwrap()).unwrap();
    std::fs::write(&old, b"old icon").unwrap();

    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", json!("/files/00/11/old.png"))])).await;
    mount_replace_survey(&app.resources, 201, 1).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/jpeg", b"new icon"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let path = response.json::<Value>()["path"].as_str().unwrap().to_string();
    assert!(path.ends_with(".jpg"));

    assert!(!old.exists());
    let remaining = files_under(&app.root().join(FILES_DIR));
    assert_eq!(remaining, vec![app.root().join(path.trim_start_matches('/'))]);
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_never_deletes_outside_files() {
    let app = create_test_app().await;
    let secret = app.root().join("secret.txt");
    std::fs::write(&secret, b"keep me").unwrap();

    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", json!("/files/../secret.txt"))])).await;
    mount_replace_survey(&app.resources, 201, 1).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(std::fs::read(&secret).unwrap(), b"keep me");
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_hides_listing_failure_cause() {
    let app = create_test_app().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/v1.0.M1/surveys/my"))
        .respond_with(wiremock::ResponseTemplate::new(503).set_body_string("db-replica-3 unreachable"))
        .mount(&app.resources)
        .await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Failed to list owned surveys");
    assert!(body.caused_by.is_none());
    assert_eq!(body.kind.as_deref(), Some("UpstreamError"));
    assert!(files_under(app.root()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_icon_upload_over_size_limit() {
    let app = create_test_app_with(|config| config.uploads.size_limit = 1024, RecordingQueue::default()).await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S1/icon")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", &vec![0u8; 4096]))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(files_under(app.root()).is_empty());
    assert!(app.received("GET").await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_missing_cookie_redirects_to_login() {
    let app = create_test_app().await;

    let response = app.server.put("/studies/S1/icon").multipart(file_form("image/png", PNG)).await;

    response.assert_status(StatusCode::FOUND);
    assert_eq!(response.header("location"), "/join?return=%2Fstudies%2FS1%2Ficon");
    assert!(app.received("GET").await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_image_choice_upload_leaves_survey_alone() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", json!("/files/00/11/old.png"))])).await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S1/tasks/imageChoice/upload")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("application/pdf", b"%PDF-1.4"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let path = response.json::<Value>()["path"].as_str().unwrap().to_string();
    assert!(is_shard_path(&path, ".pdf"), "unexpected path {path}");
    assert_eq!(files_under(&app.root().join(FILES_DIR)).len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_image_choice_upload_for_unowned_survey_is_forbidden() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 201, 0).await;

    let response = app
        .server
        .put("/studies/S2/tasks/imageChoice/upload")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(file_form("image/png", PNG))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Survey not owned by user");

    assert!(files_under(app.root()).is_empty());
    assert!(app.received("POST").await.is_empty());
    assert_eq!(app.queue.connections(), 0);
}

#[test_log::test(tokio::test)]
async fn test_client_source_upload_publishes_job() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 200, 1).await;

    let code = "export default function run(ctx) { ctx.done(); }";
    let response = app
        .server
        .post("/studies/S1/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form(code))
        .await;

    response.assert_status(StatusCode::CREATED);
    let path = response.json::<Value>()["path"].as_str().unwrap().to_string();
    assert!(is_shard_path(&path, ".flow.js"), "unexpected path {path}");
    assert_eq!(std::fs::read_to_string(app.root().join(path.trim_start_matches('/'))).unwrap(), code);

    let replaced = app.received("POST").await;
    let sent: Value = serde_json::from_slice(&replaced[0].body).unwrap();
    assert_eq!(sent["task"]["steps"][0]["settings"]["client"], path);
    assert_eq!(sent["task"]["steps"][0]["type"], "custom");

    assert_eq!(
        app.queue.published(),
        vec![QueueMessage {
            survey_id: "S1".to_string(),
            step_id: "ST1".to_string(),
            path,
        }]
    );
}

#[test_log::test(tokio::test)]
async fn test_client_source_for_unknown_step_is_rejected() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 200, 0).await;

    let response = app
        .server
        .post("/studies/S1/tasks/ST9/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form("1;"))
        .await;

    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    assert!(files_under(app.root()).is_empty());
    assert_eq!(app.queue.connections(), 0);
}

#[test_log::test(tokio::test)]
async fn test_client_source_for_unowned_survey_is_forbidden() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 200, 0).await;

    let response = app
        .server
        .post("/studies/S2/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form("1;"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: ErrorBody = response.json();
    assert_eq!(body.kind.as_deref(), Some("OwnershipError"));

    assert!(files_under(app.root()).is_empty());
    assert!(app.received("POST").await.is_empty());
    assert_eq!(app.queue.connections(), 0);
    assert!(app.queue.published().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_client_source_without_code_is_rejected() {
    let app = create_test_app().await;
    mount_replace_survey(&app.resources, 200, 0).await;

    let response = app
        .server
        .post("/studies/S1/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form(""))
        .await;

    response.assert_status(StatusCode::NOT_ACCEPTABLE);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "missing code");
}

#[test_log::test(tokio::test)]
async fn test_client_source_update_failure_skips_dispatch() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 500, 1).await;

    let response = app
        .server
        .post("/studies/S1/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form("1;"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Failed to replace survey");
    assert!(body.caused_by.unwrap().contains("500"));
    assert_eq!(app.queue.connections(), 0);

    // The committed file stays behind
    assert_eq!(files_under(&app.root().join(FILES_DIR)).len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_client_source_confirmed_publish_failure_is_reported() {
    let app = create_test_app_with(|_| {}, RecordingQueue::rejecting()).await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 200, 1).await;

    let response = app
        .server
        .post("/studies/S1/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form("1;"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "Failed to publish client source job");
    assert_eq!(body.kind.as_deref(), Some("UpstreamError"));
}

#[test_log::test(tokio::test)]
async fn test_client_source_fire_and_forget_answers_before_publish() {
    let app = create_test_app_with(
        |config| config.dispatch.mode = DispatchMode::FireAndForget,
        RecordingQueue::rejecting(),
    )
    .await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", Value::Null)])).await;
    mount_replace_survey(&app.resources, 200, 1).await;

    let response = app
        .server
        .post("/studies/S1/tasks/ST1/clientSource")
        .add_header("cookie", BEARER_COOKIE)
        .multipart(source_form("1;"))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(app.queue.connections(), 1);
}

#[test_log::test(tokio::test)]
async fn test_icon_page_renders_without_caching() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([survey_with_steps("S1", json!("/files/00/11/old.png"))])).await;

    let response = app.server.get("/studies/S1/icon").add_header("cookie", BEARER_COOKIE).await;

    response.assert_status_ok();
    assert!(response.text().contains("/studies/S1/icon"));
    assert!(response.text().contains("old.png"));
    assert_eq!(response.header("cache-control"), "no-cache, no-store, must-revalidate");
}

#[test_log::test(tokio::test)]
async fn test_icon_page_for_unowned_survey_is_forbidden() {
    let app = create_test_app().await;
    mount_owned_surveys(&app.resources, json!([])).await;

    let response = app.server.get("/studies/S2/icon").add_header("cookie", BEARER_COOKIE).await;

    response.assert_status_forbidden();
}
