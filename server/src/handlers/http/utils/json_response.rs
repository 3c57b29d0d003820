use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use tracing::{debug, error, warn};

use shared::types::{ApiEnvelope, EntityKind, ErrorResponse};

pub fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, Infallible> {
    Full::new(chunk.into()).boxed()
}

/// Serialize any `Serialize` type and deliver it as a JSON response.
pub fn deliver_serialized_json<T: Serialize>(
    data: &T,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let json = serde_json::to_string(data).context("Failed to serialize response")?;

    debug!("Delivering serialized JSON response, size: {} bytes", json.len());

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full(json))
        .map_err(|e| anyhow!("Failed to build JSON response: {}", e))
}

/// `{"status":"success","data":..}`
pub fn deliver_success_json<T: Serialize>(
    data: T,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_serialized_json(&ApiEnvelope::<T>::Success { data }, status)
}

/// `{"status":"error","code":..,"message":..}`
pub fn deliver_error_json(
    error_code: &str,
    message: &str,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    if status.is_server_error() {
        error!("Delivering error JSON: {} - {} ({})", status.as_u16(), error_code, message);
    } else {
        warn!("Delivering error JSON: {} - {} ({})", status.as_u16(), error_code, message);
    }

    deliver_serialized_json(&ErrorResponse::new(error_code, message), status)
}

pub fn not_found(kind: EntityKind, id: i64) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_error_json(
        "NOT_FOUND",
        &format!("{} {} not found", kind, id),
        StatusCode::NOT_FOUND,
    )
}

pub fn bad_request(message: &str) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_error_json("BAD_REQUEST", message, StatusCode::BAD_REQUEST)
}

/// Last-resort 500 used when a handler itself failed. Built without any
/// fallible step so the service never has to surface an error to hyper.
pub fn internal_error_response() -> Response<BoxBody<Bytes, Infallible>> {
    let body = r#"{"status":"error","code":"INTERNAL_ERROR","message":"Internal server error"}"#;
    let mut response = Response::new(full(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response<BoxBody<Bytes, Infallible>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_wraps_data() {
        let response = deliver_success_json(vec![1, 2, 3], StatusCode::CREATED).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": "success", "data": [1, 2, 3]})
        );
    }

    #[tokio::test]
    async fn not_found_names_kind_and_id() {
        let response = not_found(EntityKind::Video, 7).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "video 7 not found");
    }

    #[tokio::test]
    async fn internal_error_is_a_json_envelope() {
        let response = internal_error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["code"], "INTERNAL_ERROR");
    }
}
