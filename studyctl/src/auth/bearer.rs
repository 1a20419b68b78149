use crate::{AppState, config::SessionConfig, errors::Error};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{instrument, trace};
use url::form_urlencoded;

/// The caller's bearer token, taken from the session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct Bearer(pub String);

impl Bearer {
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Bearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Bearer(..)")
    }
}

/// Find `cookie_name` in the request's `Cookie` headers. Empty values count as absent.
fn cookie_value(parts: &Parts, cookie_name: &str) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Where to send a caller without credentials: the login page, told where to come back to.
fn login_redirect(session: &SessionConfig, parts: &Parts) -> String {
    let back = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let encoded: String = form_urlencoded::byte_serialize(back.as_bytes()).collect();
    format!("{}?return={}", session.login_path, encoded)
}

impl FromRequestParts<AppState> for Bearer {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = &state.config.session;
        match cookie_value(parts, &session.cookie_name) {
            Some(token) => Ok(Bearer(token)),
            None => {
                trace!(path = %parts.uri.path(), "No bearer cookie on request");
                Err(Error::Unauthenticated {
                    location: login_redirect(session, parts),
                })
            }
        }
    }
}
