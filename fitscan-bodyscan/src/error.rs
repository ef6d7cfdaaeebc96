//! Error types for fitscan-bodyscan
//!
//! Three layers:
//! - [`StageError`]: one failed stage call (transport, remote, decode, contract)
//! - [`ScanError`]: a failed scan attempt, tagged with the scan id and stage
//! - [`ApiError`]: HTTP-facing error with a JSON body

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fitscan_common::ClientScanId;
use serde_json::json;
use thiserror::Error;

use crate::stages::Stage;

/// Failure of a single stage call
#[derive(Debug, Error)]
pub enum StageError {
    /// Request could not be delivered (connection, TLS, DNS)
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote responded with an error status or an `error` field
    #[error("remote error (status {status:?}): {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    /// Response body did not match the expected contract shape
    #[error("decode error: {0}")]
    Decode(String),

    /// Response decoded but violates a stage invariant
    #[error("contract violation: {0}")]
    Contract(String),

    /// Request exceeded the configured timeout
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Local scan store failure
    #[error("store error: {0}")]
    Store(String),
}

impl StageError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }
}

impl From<fitscan_common::Error> for StageError {
    fn from(err: fitscan_common::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Failure of a scan attempt
#[derive(Debug, Error)]
pub enum ScanError {
    /// Request rejected before any stage ran
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    /// A non-commit stage failed; nothing was persisted
    #[error("scan {client_scan_id} failed at {stage} stage: {source}")]
    Stage {
        client_scan_id: ClientScanId,
        stage: Stage,
        #[source]
        source: StageError,
    },

    /// Every commit attempt failed; carries the last attempt's message
    #[error("scan {client_scan_id} commit failed after {attempts} attempts: {last_error}")]
    CommitExhausted {
        client_scan_id: ClientScanId,
        attempts: u32,
        last_error: String,
    },
}

impl ScanError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Stage { stage, .. } => Some(*stage),
            Self::CommitExhausted { .. } => Some(Stage::Commit),
        }
    }

    pub fn client_scan_id(&self) -> Option<&ClientScanId> {
        match self {
            Self::InvalidRequest(_) => None,
            Self::Stage { client_scan_id, .. } | Self::CommitExhausted { client_scan_id, .. } => {
                Some(client_scan_id)
            }
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Feature disabled by configuration (501)
    #[error("Not available: {0}")]
    Unavailable(String),

    /// Scan pipeline failure (502)
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// fitscan-common error
    #[error("Common error: {0}")]
    Common(#[from] fitscan_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, scan) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unavailable(msg) => {
                (StatusCode::NOT_IMPLEMENTED, "NOT_AVAILABLE", msg, None)
            }
            ApiError::Scan(ScanError::InvalidRequest(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_SCAN", msg, None)
            }
            ApiError::Scan(ref err) => {
                let code = match err {
                    ScanError::CommitExhausted { .. } => "COMMIT_FAILED",
                    _ => "STAGE_FAILED",
                };
                let scan = json!({
                    "client_scan_id": err.client_scan_id().map(|id| id.as_str()),
                    "stage": err.stage().map(|s| s.as_str()),
                });
                (StatusCode::BAD_GATEWAY, code, err.to_string(), Some(scan))
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
                None,
            ),
            ApiError::Common(fitscan_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
                None,
            ),
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(scan) = scan {
            error["scan"] = scan;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_keeps_stage_and_message() {
        let err = ScanError::Stage {
            client_scan_id: ClientScanId::parse("scan-7").unwrap(),
            stage: Stage::Match,
            source: StageError::remote(Some(500), "archetype table unavailable"),
        };
        let text = err.to_string();
        assert!(text.contains("scan-7"));
        assert!(text.contains("match"));
        assert!(text.contains("archetype table unavailable"));
        assert_eq!(err.stage(), Some(Stage::Match));
    }

    #[test]
    fn test_commit_exhausted_reports_commit_stage() {
        let err = ScanError::CommitExhausted {
            client_scan_id: ClientScanId::parse("scan-8").unwrap(),
            attempts: 3,
            last_error: "third failure".to_string(),
        };
        assert_eq!(err.stage(), Some(Stage::Commit));
        assert!(err.to_string().ends_with("third failure"));
    }

    #[test]
    fn test_scan_error_maps_to_bad_gateway() {
        let err = ApiError::Scan(ScanError::CommitExhausted {
            client_scan_id: ClientScanId::parse("scan-9").unwrap(),
            attempts: 3,
            last_error: "boom".to_string(),
        });
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_invalid_scan_maps_to_bad_request() {
        let err = ApiError::Scan(ScanError::InvalidRequest("no photos".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
