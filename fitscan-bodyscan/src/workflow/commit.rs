//! Commit coordinator
//!
//! Persists the scan aggregate with a bounded, fixed-delay retry keyed by the
//! client scan id. The payload is serialized once; every attempt sends the
//! same bytes so a duplicate write from a retried attempt can be discarded by
//! the backend's idempotency check.
//!
//! # State machine
//!
//! ```text
//! Attempting(n) ──ok──────────────────────────▶ Succeeded(n)
//!       │
//!       └─err─▶ TransientFailure(n) ──(n < max)──▶ Attempting(n+1)   [delay]
//!                                  └─(n = max)──▶ Exhausted(n)
//! ```
//!
//! The delay runs only on entry to `Attempting(n)` for n > 1.

use fitscan_common::config::CommitConfig;
use fitscan_common::ClientScanId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ScanError, StageError};
use crate::events::{EventSink, ScanEvent};
use crate::stages::{CommitBackend, Stage};
use crate::types::{CommitAck, CommitPayload, CommitReply};

/// Retry bounds for the commit stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Per-attempt timeout; a timed-out attempt counts as a failed attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CommitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Commit protocol state
#[derive(Debug, Clone, PartialEq)]
pub enum CommitState {
    Attempting { attempt: u32 },
    TransientFailure { attempt: u32, error: String },
    Succeeded { attempt: u32, ack: Option<CommitAck> },
    Exhausted { attempts: u32, last_error: String },
}

impl CommitState {
    pub fn start() -> Self {
        Self::Attempting { attempt: 1 }
    }

    /// Delay owed before running this state's attempt
    pub fn delay_before(&self, policy: &RetryPolicy) -> Option<Duration> {
        match self {
            Self::Attempting { attempt } if *attempt > 1 => Some(policy.delay),
            _ => None,
        }
    }

    /// Apply the outcome of the current attempt
    pub fn on_outcome(self, outcome: Result<Option<CommitAck>, String>) -> Self {
        match self {
            Self::Attempting { attempt } => match outcome {
                Ok(ack) => Self::Succeeded { attempt, ack },
                Err(error) => Self::TransientFailure { attempt, error },
            },
            other => other,
        }
    }

    /// Leave a failure: retry if attempts remain, else exhaust
    pub fn advance(self, policy: &RetryPolicy) -> Self {
        match self {
            Self::TransientFailure { attempt, error } => {
                if attempt < policy.max_attempts {
                    Self::Attempting {
                        attempt: attempt + 1,
                    }
                } else {
                    Self::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    }
                }
            }
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Classify one commit response object
///
/// - no response object: error
/// - `error` present: error, even when `data` is also present
/// - neither `error` nor `data`: successful but empty commit
/// - `data` with `success: false`: error
/// - otherwise: success with acknowledgement
pub fn interpret_reply(reply: Option<CommitReply>) -> Result<Option<CommitAck>, String> {
    let Some(reply) = reply else {
        return Err("commit returned no response".to_string());
    };

    if let Some(error) = reply.error {
        return Err(match error.code {
            Some(code) => format!("{} ({})", error.message, code),
            None => error.message,
        });
    }

    match reply.data {
        None => Ok(None),
        Some(ack) if ack.success == Some(false) => Err(format!(
            "commit rejected: success=false{}",
            ack.scan_id
                .as_deref()
                .map(|id| format!(" for scan {}", id))
                .unwrap_or_default()
        )),
        Some(ack) => Ok(Some(ack)),
    }
}

/// Hex SHA-256 of a serialized payload
pub fn payload_fingerprint(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Attempt number that succeeded (1-based)
    pub attempts: u32,
    /// `None` for a successful-but-empty commit
    pub ack: Option<CommitAck>,
    pub payload_sha256: String,
}

/// Drives the commit state machine against a backend
pub struct CommitCoordinator {
    backend: Arc<dyn CommitBackend>,
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl CommitCoordinator {
    pub fn new(backend: Arc<dyn CommitBackend>, policy: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            policy,
            sink,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Serialize the payload once and run the retry protocol
    pub async fn commit(&self, payload: &CommitPayload) -> Result<CommitReceipt, ScanError> {
        let body = serde_json::to_vec(payload).map_err(|e| ScanError::Stage {
            client_scan_id: payload.client_scan_id.clone(),
            stage: Stage::Commit,
            source: StageError::Decode(format!("encode commit payload: {}", e)),
        })?;
        self.commit_bytes(&payload.client_scan_id, &body).await
    }

    /// Run the retry protocol over an already-serialized payload
    pub async fn commit_bytes(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> Result<CommitReceipt, ScanError> {
        let payload_sha256 = payload_fingerprint(body);
        let mut state = CommitState::start();

        loop {
            state = match state {
                CommitState::Attempting { attempt } => {
                    if let Some(delay) = state.delay_before(&self.policy) {
                        tracing::debug!(
                            client_scan_id = client_scan_id.as_str(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Waiting before commit retry"
                        );
                        tokio::time::sleep(delay).await;
                    }

                    let outcome = self.attempt(client_scan_id, body).await;
                    if let Err(error) = &outcome {
                        self.sink.record(&ScanEvent::CommitAttemptFailed {
                            client_scan_id: client_scan_id.clone(),
                            attempt,
                            max_attempts: self.policy.max_attempts,
                            error: error.clone(),
                        });
                    }
                    state.on_outcome(outcome)
                }
                failure @ CommitState::TransientFailure { .. } => failure.advance(&self.policy),
                CommitState::Succeeded { attempt, ack } => {
                    self.sink.record(&ScanEvent::CommitSucceeded {
                        client_scan_id: client_scan_id.clone(),
                        attempt,
                        scan_id: ack.as_ref().and_then(|a| a.scan_id.clone()),
                    });
                    return Ok(CommitReceipt {
                        attempts: attempt,
                        ack,
                        payload_sha256,
                    });
                }
                CommitState::Exhausted {
                    attempts,
                    last_error,
                } => {
                    self.sink.record(&ScanEvent::CommitExhausted {
                        client_scan_id: client_scan_id.clone(),
                        attempts,
                        last_error: last_error.clone(),
                    });
                    return Err(ScanError::CommitExhausted {
                        client_scan_id: client_scan_id.clone(),
                        attempts,
                        last_error,
                    });
                }
            };
        }
    }

    async fn attempt(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> Result<Option<CommitAck>, String> {
        let call = self.backend.submit(client_scan_id, body);
        let result = match self.policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout(limit.as_millis() as u64)),
            },
            None => call.await,
        };

        match result {
            Ok(reply) => interpret_reply(reply),
            Err(e) => Err(e.to_string()),
        }
    }
}
