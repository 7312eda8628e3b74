//! The JSON wrapper shared by every route.
//!
//! ```json
//! {"status": "success", "data": { ... }, "timestamp": "2024-05-01T12:00:00.000Z"}
//! {"status": "error", "detail": {"code": "InvalidParameter", "message": "..."}, "timestamp": "..."}
//! ```

use axum::Json;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
    #[serde(serialize_with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            data: Some(data),
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

impl Envelope<()> {
    pub fn error(error: &GatewayError, extra: Map<String, Value>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            detail: Some(ErrorDetail {
                code: error.code(),
                message: error.to_string(),
                extra,
            }),
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

fn iso8601<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
