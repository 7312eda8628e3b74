use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::Envelope;

/// Every failure a request can end in.
///
/// The `Display` text is what the client sees, so variants that carry
/// diagnostics (stderr, parser messages) keep them out of the message.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or malformed bearer credential")]
    Unauthenticated,

    #[error("invalid API key")]
    InvalidCredential,

    #[error("source address is not allowed")]
    ForbiddenSource,

    #[error("no such endpoint: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("accounting tool timed out after {timeout_secs}s")]
    ToolTimeout { timeout_secs: u64 },

    #[error("accounting tool exited with {status}")]
    ToolExecutionFailed { status: String, stderr: String },

    #[error("accounting tool is unavailable")]
    ToolUnavailable { reason: String },

    #[error("accounting tool returned malformed output")]
    MalformedToolOutput { reason: String },

    #[error("too many concurrent tool invocations, try again later")]
    ServiceBusy,

    #[error("internal server error")]
    InternalError { reason: String },
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::ForbiddenSource => StatusCode::FORBIDDEN,
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
            Self::ToolTimeout { .. }
            | Self::ToolExecutionFailed { .. }
            | Self::ToolUnavailable { .. }
            | Self::MalformedToolOutput { .. }
            | Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::InvalidCredential => "InvalidCredential",
            Self::ForbiddenSource => "ForbiddenSource",
            Self::InvalidParameter(_) => "InvalidParameter",
            Self::NotFound(_) => "NotFound",
            Self::ToolTimeout { .. } => "ToolTimeout",
            Self::ToolExecutionFailed { .. } => "ToolExecutionFailed",
            Self::ToolUnavailable { .. } => "ToolUnavailable",
            Self::MalformedToolOutput { .. } => "MalformedToolOutput",
            Self::ServiceBusy => "ServiceBusy",
            Self::InternalError { .. } => "InternalError",
        }
    }

    /// Rejections the auth guard produces and logs itself, with the caller's
    /// address.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::InvalidCredential | Self::ForbiddenSource
        )
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::InternalError {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToolOutput {
            reason: reason.into(),
        }
    }

    /// Attach extra fields to the error detail, e.g. `vnstat_status` on `/status`.
    pub fn with_detail(self, key: &str, value: impl Into<Value>) -> DetailedError {
        DetailedError::from(self).with_detail(key, value)
    }
}

/// A [`GatewayError`] plus additional fields merged into the envelope's `detail`.
#[derive(Debug)]
pub struct DetailedError {
    pub error: GatewayError,
    pub extra: Map<String, Value>,
}

impl DetailedError {
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl From<GatewayError> for DetailedError {
    fn from(error: GatewayError) -> Self {
        Self {
            error,
            extra: Map::new(),
        }
    }
}

impl IntoResponse for DetailedError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if !self.error.is_auth_rejection() {
            log::warn!(
                "request failed: status={} code={} message={}",
                status.as_u16(),
                self.error.code(),
                self.error
            );
        }

        let mut response =
            (status, Envelope::error(&self.error, self.extra)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        DetailedError::from(self).into_response()
    }
}
