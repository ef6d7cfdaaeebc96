//! Scan endpoints
//!
//! - `POST /scans`: run the pipeline for one scan attempt
//! - `GET /scans/:client_scan_id`: read a scan from the local store; only
//!   available when `commit.target = "local"`

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use fitscan_common::ClientScanId;
use serde::Deserialize;

use crate::db::StoredScan;
use crate::error::{ApiError, ApiResult};
use crate::types::{DeclaredBiometrics, ScanPhoto, ScanRequest};
use crate::workflow::ScanOutcome;
use crate::AppState;

/// POST /scans request body
///
/// `client_scan_id` is generated when absent. A caller retrying a whole scan
/// attempt from scratch should omit it or send a new one.
#[derive(Debug, Deserialize)]
pub struct ScanSubmission {
    #[serde(default)]
    pub client_scan_id: Option<String>,
    pub user_id: String,
    pub photos: Vec<ScanPhoto>,
    pub biometrics: DeclaredBiometrics,
}

impl ScanSubmission {
    pub fn into_request(self) -> ApiResult<ScanRequest> {
        let client_scan_id = match self.client_scan_id {
            Some(id) => ClientScanId::parse(&id)?,
            None => ClientScanId::generate(),
        };
        Ok(ScanRequest {
            client_scan_id,
            user_id: self.user_id,
            photos: self.photos,
            biometrics: self.biometrics,
        })
    }
}

/// POST /scans
pub async fn submit_scan(
    State(state): State<AppState>,
    Json(submission): Json<ScanSubmission>,
) -> ApiResult<Json<ScanOutcome>> {
    let request = submission.into_request()?;
    let client_scan_id = request.client_scan_id.clone();

    tracing::info!(
        client_scan_id = client_scan_id.as_str(),
        user_id = %request.user_id,
        photos = request.photos.len(),
        "Scan submitted"
    );

    match state.pipeline.run(request).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(err) => {
            *state.last_error.write().await = Some(err.to_string());
            Err(ApiError::Scan(err))
        }
    }
}

/// GET /scans/:client_scan_id
pub async fn get_scan(
    State(state): State<AppState>,
    Path(client_scan_id): Path<String>,
) -> ApiResult<Json<StoredScan>> {
    let store = state.store.as_ref().ok_or_else(|| {
        ApiError::Unavailable(
            "scan lookup requires commit.target = \"local\"; scans are committed remotely"
                .to_string(),
        )
    })?;
    let id = ClientScanId::parse(&client_scan_id)?;
    store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("scan {}", id)))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(submit_scan))
        .route("/scans/:client_scan_id", get(get_scan))
}
