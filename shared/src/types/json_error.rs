use serde::{Deserialize, Serialize};

/// Standard error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Every API body is one of these two shapes:
/// `{"status":"success","data":..}` or `{"status":"error","code":..,"message":..}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiEnvelope<T> {
    Success { data: T },
    Error { code: String, message: String },
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<T, ErrorResponse> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Error { code, message } => Err(ErrorResponse::new(&code, &message)),
        }
    }
}
