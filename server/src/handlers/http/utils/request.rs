use std::convert::Infallible;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::header::{AUTHORIZATION, HeaderMap};
use hyper::{Response, StatusCode};

use shared::types::{ContentFields, UPDATE_ID_HEADER, UpdateId};

use crate::handlers::http::utils::json_response::deliver_error_json;

/// Numeric id from the last path segment: `/admin/api/matches/42` -> `42`.
pub fn path_id(path: &str) -> Option<i64> {
    let clean = path.split('?').next().unwrap_or(path);
    clean.rsplit('/').next()?.parse().ok()
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Reuse the caller's `x-update-id` so the event this write produces carries
/// the id the caller already delivered locally. Missing or malformed headers
/// get a fresh id.
pub fn update_id_from(headers: &HeaderMap) -> UpdateId {
    headers
        .get(UPDATE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(UpdateId::parse)
        .unwrap_or_default()
}

/// Constant-time comparison for the admin token.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A request body that could not be turned into valid fields.
#[derive(Debug)]
pub struct Rejection {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl Rejection {
    pub fn into_response(self) -> Result<Response<BoxBody<Bytes, Infallible>>> {
        deliver_error_json(self.code, &self.message, self.status)
    }
}

/// Decode and validate a create/update body. Malformed JSON is a 400; JSON
/// that decodes but breaks a field rule is a 422.
pub fn parse_fields<F: ContentFields>(body: &[u8]) -> std::result::Result<F, Rejection> {
    let fields: F = serde_json::from_slice(body).map_err(|e| Rejection {
        status: StatusCode::BAD_REQUEST,
        code: "BAD_REQUEST",
        message: format!("Invalid {} body: {}", F::KIND, e),
    })?;

    fields.validate().map_err(|e| Rejection {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "VALIDATION_FAILED",
        message: e.to_string(),
    })?;

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use shared::types::{HighlightFields, MatchFields};

    #[test]
    fn path_id_reads_last_segment() {
        assert_eq!(path_id("/api/matches/42"), Some(42));
        assert_eq!(path_id("/api/matches/42?x=1"), Some(42));
        assert_eq!(path_id("/api/matches/abc"), None);
        assert_eq!(path_id("/api/matches/"), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  s3cret-token "));
        assert_eq!(bearer_token(&headers), Some("s3cret-token"));
    }

    #[test]
    fn update_id_header_is_reused_when_valid() {
        let id = UpdateId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            UPDATE_ID_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(update_id_from(&headers), id);

        headers.insert(UPDATE_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_ne!(update_id_from(&headers), id);
    }

    #[test]
    fn token_comparison() {
        assert!(token_matches("abcdefghijkl", "abcdefghijkl"));
        assert!(!token_matches("abcdefghijkm", "abcdefghijkl"));
        assert!(!token_matches("abc", "abcdefghijkl"));
    }

    #[test]
    fn malformed_body_is_400_and_invalid_body_is_422() {
        let err = parse_fields::<HighlightFields>(b"{not json").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = parse_fields::<MatchFields>(
            br#"{"home_team":"A","away_team":"a","kickoff":0}"#,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "VALIDATION_FAILED");
    }
}
