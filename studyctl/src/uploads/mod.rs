//! Validation of inbound upload bodies.
//!
//! The gateway reads the multipart body, picks out the expected field and decides the storage
//! extension. It performs no filesystem or network side effects: the accepted bytes are held in
//! memory (bounded by the configured size limit) until ownership has been verified.

use crate::errors::{Error, Result};
use axum::extract::Multipart;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument, warn};

/// Multipart field carrying an uploaded binary asset
pub const FILE_FIELD: &str = "file";
/// Multipart field carrying task client source code
pub const CLIENT_CODE_FIELD: &str = "clientCode";
/// Extension given to stored client source, regardless of what the browser declares
pub const CLIENT_SOURCE_EXTENSION: &str = ".flow.js";

pub const MISSING_FILE: &str = "missing file";
pub const MISSING_CODE: &str = "missing code";
pub const UNSUPPORTED_TYPE: &str = "unsupported type";

/// Map a declared content type onto the storage extension, if it is on the allow-list.
///
/// Parameters (`; charset=...`) and letter case are ignored.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some(".png"),
        "image/jpeg" => Some(".jpg"),
        "application/pdf" => Some(".pdf"),
        _ => None,
    }
}

/// An accepted binary upload.
#[derive(Debug)]
pub struct FileUpload {
    pub contents: Bytes,
    pub extension: &'static str,
}

/// An accepted client source submission.
#[derive(Debug)]
pub struct SourceUpload {
    pub code: String,
}

impl SourceUpload {
    pub fn extension(&self) -> &'static str {
        CLIENT_SOURCE_EXTENSION
    }
}

/// Validates upload bodies for the icon and client-source routes.
#[derive(Debug, Clone, Copy)]
pub struct UploadGateway {
    size_limit: usize,
}

impl UploadGateway {
    pub fn new(size_limit: usize) -> Self {
        Self { size_limit }
    }

    /// Extract the single `file` field, checking its declared type before reading any content.
    #[instrument(skip_all)]
    pub async fn file(&self, multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<FileUpload> {
        let mut multipart = multipart.map_err(|e| {
            debug!(error = %e, "Upload body is not multipart");
            Error::validation(MISSING_FILE)
        })?;

        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            // Browsers send an empty, unnamed part when no file was picked
            if field.file_name() == Some("") {
                continue;
            }

            let content_type = field.content_type().unwrap_or_default().to_string();
            let Some(extension) = extension_for(&content_type) else {
                debug!(content_type = %content_type, "Rejecting upload with unsupported type");
                return Err(Error::validation(UNSUPPORTED_TYPE));
            };

            let mut contents = BytesMut::new();
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                if contents.len() + chunk.len() > self.size_limit {
                    warn!(size_limit = self.size_limit, "Upload exceeds size limit");
                    return Err(self.too_large());
                }
                contents.extend_from_slice(&chunk);
            }

            debug!(content_type = %content_type, bytes = contents.len(), file_name = ?field.file_name(), "Accepted file upload");
            return Ok(FileUpload {
                contents: contents.freeze(),
                extension,
            });
        }

        Err(Error::validation(MISSING_FILE))
    }

    /// Extract the `clientCode` text field.
    #[instrument(skip_all)]
    pub async fn client_source(&self, multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<SourceUpload> {
        let mut multipart = multipart.map_err(|e| {
            debug!(error = %e, "Source body is not multipart");
            Error::validation(MISSING_CODE)
        })?;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(CLIENT_CODE_FIELD) {
                continue;
            }

            let code = field.text().await.map_err(multipart_error)?;
            if code.is_empty() {
                break;
            }
            if code.len() > self.size_limit {
                return Err(self.too_large());
            }

            debug!(bytes = code.len(), "Accepted client source");
            return Ok(SourceUpload { code });
        }

        Err(Error::validation(MISSING_CODE))
    }

    fn too_large(&self) -> Error {
        Error::PayloadTooLarge {
            message: format!("Upload exceeds maximum allowed size of {} bytes", self.size_limit),
        }
    }
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { message: e.body_text() }
    } else {
        Error::validation(format!("invalid multipart body: {}", e.body_text()))
    }
}
