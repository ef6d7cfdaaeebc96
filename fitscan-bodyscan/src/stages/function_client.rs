//! HTTP client for the remote stage functions
//!
//! Every stage is a JSON `POST {base_url}/{function}` with a bearer key. A
//! response is a failure when the status is not 2xx or when the body carries a
//! non-null top-level `error` field, whatever else it contains.

use fitscan_common::config::{BackendConfig, FunctionNames};
use fitscan_common::ClientScanId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::StageError;
use crate::stages::{
    ArchetypeMatcher, BodyMeasurementEstimator, CommitBackend, MorphologicalRefiner,
    SemanticClassifier, Stage,
};
use crate::types::{
    CommitAck, CommitReply, EstimateRequest, EstimateResponse, MatchRequest, MatchResponse,
    RefineProposal, RefineRequest, RemoteError, SemanticRequest, SemanticResponse,
};

const USER_AGENT: &str = concat!("fitscan-bodyscan/", env!("CARGO_PKG_VERSION"));

/// Client for the backend function host
pub struct FunctionClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    functions: FunctionNames,
    request_timeout_secs: u64,
}

impl FunctionClient {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self, StageError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StageError::Transport("backend base_url is not configured".to_string()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StageError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
            functions: config.functions.clone(),
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    fn function_name(&self, stage: Stage) -> &str {
        match stage {
            Stage::Estimate => &self.functions.estimate,
            Stage::Semantic => &self.functions.semantic,
            Stage::Match => &self.functions.matching,
            Stage::Refine => &self.functions.refine,
            Stage::Commit => &self.functions.commit,
        }
    }

    fn url(&self, stage: Stage) -> String {
        format!("{}/{}", self.base_url, self.function_name(stage))
    }

    fn map_send_error(&self, err: reqwest::Error) -> StageError {
        if err.is_timeout() {
            StageError::Timeout(self.request_timeout_secs * 1000)
        } else {
            StageError::Transport(err.to_string())
        }
    }

    /// POST a raw JSON body and return (status, body text)
    ///
    /// `correlation` is only used for logging.
    async fn post_raw(
        &self,
        stage: Stage,
        correlation: &str,
        body: Vec<u8>,
    ) -> Result<(u16, String), StageError> {
        let url = self.url(stage);
        let start = Instant::now();

        tracing::debug!(
            correlation,
            stage = stage.as_str(),
            url = %url,
            bytes = body.len(),
            "Calling stage function"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_send_error(e))?;

        tracing::debug!(
            correlation,
            stage = stage.as_str(),
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stage function responded"
        );

        Ok((status, text))
    }

    /// Call a fail-fast stage and decode its response
    async fn call<Req, Resp>(
        &self,
        stage: Stage,
        correlation: &str,
        request: &Req,
    ) -> Result<Resp, StageError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)
            .map_err(|e| StageError::Decode(format!("encode {} request: {}", stage, e)))?;
        let (status, text) = self.post_raw(stage, correlation, body).await?;
        decode_stage_response(status, &text)
    }
}

/// Decode a fail-fast stage response body
pub fn decode_stage_response<T: DeserializeOwned>(status: u16, text: &str) -> Result<T, StageError> {
    let parsed: Option<Value> = serde_json::from_str(text).ok();

    if !(200..300).contains(&status) {
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .filter(|e| !e.is_null())
            .map(|e| remote_error_from_value(e, Some(status)).message)
            .unwrap_or_else(|| text.trim().to_string());
        return Err(StageError::remote(Some(status), message));
    }

    let value = parsed.ok_or_else(|| StageError::Decode(format!("response is not JSON: {}", snippet(text))))?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let remote = remote_error_from_value(error, Some(status));
        return Err(StageError::remote(Some(status), remote.message));
    }

    serde_json::from_value(value).map_err(|e| StageError::Decode(e.to_string()))
}

/// Build a commit reply object from an HTTP response
///
/// - 2xx with an empty or `null` body: reply with neither data nor error
/// - 2xx JSON object: `error` field (if non-null) plus the remaining fields as data
/// - non-2xx: reply carrying only an error
pub fn commit_reply_from_response(status: u16, text: &str) -> Result<CommitReply, StageError> {
    let trimmed = text.trim();
    let parsed: Option<Value> = if trimmed.is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_str(trimmed).ok()
    };

    if !(200..300).contains(&status) {
        let error = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .filter(|e| !e.is_null())
            .map(|e| remote_error_from_value(e, Some(status)))
            .unwrap_or_else(|| RemoteError {
                message: if trimmed.is_empty() {
                    format!("commit failed with status {}", status)
                } else {
                    trimmed.to_string()
                },
                code: None,
                status: Some(status),
            });
        return Ok(CommitReply {
            data: None,
            error: Some(error),
        });
    }

    let value = parsed
        .ok_or_else(|| StageError::Decode(format!("commit response is not JSON: {}", snippet(text))))?;

    let mut object = match value {
        Value::Null => return Ok(CommitReply::default()),
        Value::Object(object) => object,
        other => {
            return Err(StageError::Decode(format!(
                "commit response is not an object: {}",
                other
            )))
        }
    };

    let error = object
        .remove("error")
        .filter(|e| !e.is_null())
        .map(|e| remote_error_from_value(&e, Some(status)));

    let data = match object.remove("data") {
        Some(Value::Null) => Ok(None),
        Some(inner) => serde_json::from_value::<CommitAck>(inner).map(Some),
        None if object.is_empty() => Ok(None),
        None => serde_json::from_value::<CommitAck>(Value::Object(object)).map(Some),
    };

    match error {
        // The remote error is reported even when the data beside it is malformed
        Some(error) => Ok(CommitReply {
            data: data.ok().flatten(),
            error: Some(error),
        }),
        None => Ok(CommitReply {
            data: data.map_err(|e| StageError::Decode(e.to_string()))?,
            error: None,
        }),
    }
}

/// Read an `error` field that is either a string or an object
fn remote_error_from_value(value: &Value, status: Option<u16>) -> RemoteError {
    match value {
        Value::String(message) => RemoteError {
            message: message.clone(),
            code: None,
            status,
        },
        Value::Object(object) => RemoteError {
            message: object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            code: object.get("code").and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            status,
        },
        other => RemoteError {
            message: other.to_string(),
            code: None,
            status,
        },
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}

#[async_trait::async_trait]
impl BodyMeasurementEstimator for FunctionClient {
    async fn estimate(&self, request: &EstimateRequest) -> Result<EstimateResponse, StageError> {
        self.call(Stage::Estimate, request.client_scan_id.as_str(), request).await
    }
}

#[async_trait::async_trait]
impl SemanticClassifier for FunctionClient {
    async fn classify(&self, request: &SemanticRequest) -> Result<SemanticResponse, StageError> {
        self.call(Stage::Semantic, request.client_scan_id.as_str(), request).await
    }
}

#[async_trait::async_trait]
impl ArchetypeMatcher for FunctionClient {
    async fn find_matches(&self, request: &MatchRequest) -> Result<MatchResponse, StageError> {
        // Match requests carry no scan id on the wire
        self.call(Stage::Match, &request.user_id, request).await
    }
}

#[async_trait::async_trait]
impl MorphologicalRefiner for FunctionClient {
    async fn refine(&self, request: &RefineRequest) -> Result<RefineProposal, StageError> {
        self.call(Stage::Refine, request.scan_id.as_str(), request).await
    }
}

#[async_trait::async_trait]
impl CommitBackend for FunctionClient {
    async fn submit(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> Result<Option<CommitReply>, StageError> {
        let (status, text) = self.post_raw(Stage::Commit, client_scan_id.as_str(), body.to_vec()).await?;
        commit_reply_from_response(status, &text).map(Some)
    }
}
