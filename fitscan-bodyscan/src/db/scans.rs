//! Local scan store
//!
//! A commit backend writing to the `body_scans` table. The client scan id is
//! the primary key, so a retried or duplicated commit cannot create a second
//! record:
//! - same id, same payload hash: the existing record is acknowledged again
//! - same id, different payload hash: rejected with an error reply

use chrono::{DateTime, Utc};
use fitscan_common::{ClientScanId, Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::error::StageError;
use crate::stages::CommitBackend;
use crate::types::{CommitAck, CommitReply, RemoteError};
use crate::utils::retry_on_lock;
use crate::workflow::commit::payload_fingerprint;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// One committed scan
#[derive(Debug, Clone, Serialize)]
pub struct StoredScan {
    pub client_scan_id: String,
    pub scan_id: String,
    pub user_id: String,
    pub payload_sha256: String,
    pub committed_at: DateTime<Utc>,
    pub payload: Value,
}

/// SQLite-backed commit target
#[derive(Clone)]
pub struct SqliteScanStore {
    pool: Pool<Sqlite>,
    max_lock_wait_ms: u64,
}

impl SqliteScanStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Insert unless the id exists; return the stored (scan_id, sha256)
    async fn insert_or_existing(
        &self,
        client_scan_id: &str,
        user_id: &str,
        payload_json: &str,
        payload_sha256: &str,
    ) -> Result<(String, String)> {
        let scan_id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO body_scans
                 (client_scan_id, scan_id, user_id, payload_json, payload_sha256, committed_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(client_scan_id) DO NOTHING",
        )
        .bind(client_scan_id)
        .bind(&scan_id)
        .bind(user_id)
        .bind(payload_json)
        .bind(payload_sha256)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let row: (String, String) = sqlx::query_as(
            "SELECT scan_id, payload_sha256 FROM body_scans WHERE client_scan_id = ?",
        )
        .bind(client_scan_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row)
    }

    /// Fetch a committed scan by client scan id
    pub async fn get(&self, client_scan_id: &ClientScanId) -> Result<Option<StoredScan>> {
        let row: Option<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT client_scan_id, scan_id, user_id, payload_sha256, committed_at, payload_json
             FROM body_scans WHERE client_scan_id = ?",
        )
        .bind(client_scan_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some((client_scan_id, scan_id, user_id, payload_sha256, committed_at, payload_json)) = row
        else {
            return Ok(None);
        };

        let committed_at = DateTime::parse_from_rfc3339(&committed_at)
            .map_err(|e| Error::Internal(format!("bad committed_at {}: {}", committed_at, e)))?
            .with_timezone(&Utc);
        let payload = serde_json::from_str(&payload_json)
            .map_err(|e| Error::Internal(format!("stored payload is not JSON: {}", e)))?;

        Ok(Some(StoredScan {
            client_scan_id,
            scan_id,
            user_id,
            payload_sha256,
            committed_at,
            payload,
        }))
    }

    /// Number of committed scans for a client scan id (0 or 1)
    pub async fn count(&self, client_scan_id: &ClientScanId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM body_scans WHERE client_scan_id = ?")
                .bind(client_scan_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}

fn rejection(message: String, code: &str) -> Option<CommitReply> {
    Some(CommitReply {
        data: None,
        error: Some(RemoteError {
            message,
            code: Some(code.to_string()),
            status: None,
        }),
    })
}

#[async_trait::async_trait]
impl CommitBackend for SqliteScanStore {
    async fn submit(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> std::result::Result<Option<CommitReply>, StageError> {
        let payload_json = std::str::from_utf8(body)
            .map_err(|e| StageError::Decode(format!("commit body is not UTF-8: {}", e)))?;
        let payload: Value = serde_json::from_str(payload_json)
            .map_err(|e| StageError::Decode(format!("commit body is not JSON: {}", e)))?;

        if payload.get("clientScanId").and_then(Value::as_str) != Some(client_scan_id.as_str()) {
            return Ok(rejection(
                format!("payload clientScanId does not match {}", client_scan_id),
                "id_mismatch",
            ));
        }
        let Some(user_id) = payload.get("user_id").and_then(Value::as_str) else {
            return Ok(rejection("payload has no user_id".to_string(), "invalid_payload"));
        };

        let payload_sha256 = payload_fingerprint(body);
        let (scan_id, stored_sha256) = retry_on_lock("body scan commit", self.max_lock_wait_ms, || {
            self.insert_or_existing(client_scan_id.as_str(), user_id, payload_json, &payload_sha256)
        })
        .await?;

        if stored_sha256 != payload_sha256 {
            tracing::warn!(
                client_scan_id = client_scan_id.as_str(),
                scan_id = %scan_id,
                "Rejecting commit: client scan id already stored with a different payload"
            );
            return Ok(rejection(
                format!(
                    "client scan id {} already committed with a different payload",
                    client_scan_id
                ),
                "conflict",
            ));
        }

        tracing::info!(
            client_scan_id = client_scan_id.as_str(),
            scan_id = %scan_id,
            "Body scan stored"
        );

        Ok(Some(CommitReply {
            data: Some(CommitAck {
                scan_id: Some(scan_id),
                success: Some(true),
                processing_complete: Some(true),
            }),
            error: None,
        }))
    }
}
