//! Custom Axum extractors for the upload API.
//!
//! Authentication proper lives in an upstream gateway (out of scope here);
//! it forwards the verified subject in `X-User-Id`. The extractor turns that
//! into a typed principal handlers consume explicitly — nothing is smuggled
//! through request extensions.

use super::errors::ApiError;
use crate::service::ClientInfo;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

/// Header carrying the authenticated subject.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Verified request principal.
///
/// # Example
/// ```ignore
/// async fn status(
///     State(state): State<Arc<AppState>>,
///     Principal(user_id): Principal,
/// ) -> Result<Response, ApiError> {
///     // user_id is present and well-formed here
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl std::ops::Deref for Principal {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        if !is_valid_user_id(raw) {
            return Err(ApiError::Unauthorized);
        }
        Ok(Principal(raw.to_string()))
    }
}

/// User ids are opaque tokens; bound the charset so they can appear in
/// storage keys and rate-limit buckets without escaping.
fn is_valid_user_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 128
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Client fingerprints for the metric event log.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    ClientInfo { ip, user_agent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(is_valid_user_id("user-123"));
        assert!(is_valid_user_id("a"));
        assert!(is_valid_user_id(&"x".repeat(128)));

        assert!(!is_valid_user_id(""));
        assert!(!is_valid_user_id(&"x".repeat(129)));
        assert!(!is_valid_user_id("user/123"));
        assert!(!is_valid_user_id("user 123"));
        assert!(!is_valid_user_id("../etc"));
    }

    #[test]
    fn test_client_info_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("user-agent", "resumable-client/2.1".parse().unwrap());

        let info = client_info(&headers);
        assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("resumable-client/2.1"));

        let empty = client_info(&HeaderMap::new());
        assert!(empty.ip.is_none());
        assert!(empty.user_agent.is_none());
    }
}
