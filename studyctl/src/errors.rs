use crate::dispatch::DispatchError;
use crate::storage::StorageError;
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

/// Outbound call that failed, used to decide how much of the cause a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamCall {
    /// `GET /surveys/my` during the ownership check
    ListOwnedSurveys,
    /// `POST /surveys` full replace
    ReplaceSurvey,
    /// Publish to the client-source work queue
    PublishJob,
}

impl UpstreamCall {
    /// The ownership listing is the trust boundary; its failures are reported without detail.
    fn exposes_cause(self) -> bool {
        !matches!(self, UpstreamCall::ListOwnedSurveys)
    }
}

impl fmt::Display for UpstreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamCall::ListOwnedSurveys => write!(f, "list owned surveys"),
            UpstreamCall::ReplaceSurvey => write!(f, "replace survey"),
            UpstreamCall::PublishJob => write!(f, "publish client source job"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// No bearer credential on a protected route; answered with a redirect to the login page
    #[error("Not authenticated")]
    Unauthenticated { location: String },

    /// Malformed or unsupported upload input
    #[error("{message}")]
    Validation { message: String },

    /// Upload body larger than the configured limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Caller does not own the targeted resource
    #[error("{resource} {id} not owned by caller")]
    Ownership { resource: String, id: String },

    /// Directory provisioning, staging or commit failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Remote document store or broker failure
    #[error("Failed to {call}: {source}")]
    Upstream {
        call: UpstreamCall,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// JSON error body: `{error, [causedBy], [type]}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "causedBy", default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into() }
    }

    pub fn upstream<E>(call: UpstreamCall, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Upstream {
            call,
            source: Box::new(source),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::FOUND,
            Error::Validation { .. } => StatusCode::NOT_ACCEPTABLE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Ownership { .. } => StatusCode::FORBIDDEN,
            Error::Storage(_) | Error::Upstream { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name of the error class reported in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "Unauthenticated",
            Error::Validation { .. } => "ValidationError",
            Error::PayloadTooLarge { .. } => "PayloadTooLarge",
            Error::Ownership { .. } => "OwnershipError",
            Error::Storage(_) => "StorageError",
            Error::Upstream { .. } => "UpstreamError",
            Error::Internal { .. } => "InternalError",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { .. } => "Authentication required".to_string(),
            Error::Validation { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::Ownership { resource, .. } => format!("{resource} not owned by user"),
            Error::Storage(_) => "Failed to store file".to_string(),
            Error::Upstream { call, .. } => format!("Failed to {call}"),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }

    /// Detail that may be shown to the caller alongside the message
    pub fn caused_by(&self) -> Option<String> {
        match self {
            Error::Ownership { resource, .. } => Some(format!("{resource} not found")),
            Error::Upstream { call, source } if call.exposes_cause() => Some(source.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Storage(_) | Error::Upstream { .. } | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Ownership { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Validation { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        if let Error::Unauthenticated { location } = &self {
            return (StatusCode::FOUND, [(header::LOCATION, location.clone())]).into_response();
        }

        let body = ErrorBody {
            error: self.user_message(),
            caused_by: self.caused_by(),
            kind: Some(self.kind().to_string()),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<DispatchError> for Error {
    fn from(err: DispatchError) -> Self {
        Error::upstream(UpstreamCall::PublishJob, err)
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
