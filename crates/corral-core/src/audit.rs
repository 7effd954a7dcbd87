//! Append-only audit trail.
//!
//! Every logical state-changing call writes exactly one [`AuditRecord`] —
//! synchronously before the call returns for request-initiated actions,
//! after-the-fact for asynchronous provisioning/teardown outcomes. There is
//! no update or delete operation. Ordering by timestamp is the only
//! guarantee; records carry no causal links.
//!
//! Appends for a transition that is already committed go through
//! [`AuditLog::append_or_warn`]: a sink failure is logged, never propagated,
//! so a broken audit sink cannot strand a sandbox between a persisted status
//! and a failed call.
//!
//! The [`AuditLog`] trait allows pluggable sinks. [`JsonLinesAuditLog`]
//! writes newline-delimited JSON to any `AsyncWrite`; [`MemoryAuditLog`]
//! buffers records for tests; [`TracingAuditLog`] emits structured events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_error::LifecycleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Requester identity recorded for system-initiated (asynchronous) outcomes.
pub const SYSTEM_REQUESTER: &str = "system";

/// The action an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditAction {
    /// A creation request persisted a sandbox and its approval.
    CreateSandbox,
    /// An authorized approver flipped an approval.
    Approve,
    /// Asynchronous provisioning reached ACTIVE.
    ProvisionComplete,
    /// Asynchronous provisioning reached FAILED.
    ProvisionFailed,
    /// A credential handle was read out.
    GetKubeconfig,
    /// A validation test ran against a provisioned sandbox.
    RunTest,
    /// A destroy request transitioned the sandbox to DESTROYING.
    DestroyRequest,
    /// Asynchronous teardown reached DESTROYED.
    DestroyComplete,
}

/// An immutable log entry capturing an action's requester, inputs, and result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Opaque unique token.
    pub id: String,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Identity that triggered the action ([`SYSTEM_REQUESTER`] for
    /// asynchronous outcomes).
    pub requester: String,
    /// The action performed.
    pub action: AuditAction,
    /// Structured call parameters.
    pub inputs: Value,
    /// Structured call outcome.
    pub result: Value,
}

impl AuditRecord {
    /// Build a record with a fresh id and the current timestamp.
    pub fn new(
        requester: impl Into<String>,
        action: AuditAction,
        inputs: Value,
        result: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            requester: requester.into(),
            action,
            inputs,
            result,
        }
    }
}

/// Trait for audit log sinks. Append-only by construction.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append a record, durably for the caller. Returns the record id.
    async fn append(&self, record: AuditRecord) -> Result<String, LifecycleError>;

    /// Append a record for an effect that is already committed.
    ///
    /// The transition is durable by the time this runs; surfacing a sink
    /// error here would leave the caller with a failed call and no way to
    /// drive the committed state forward, so the failure is logged instead.
    async fn append_or_warn(&self, record: AuditRecord) {
        let action = record.action;
        if let Err(e) = self.append(record).await {
            tracing::warn!(error = %e, action = ?action, "audit append failed");
        }
    }
}

/// Buffers records in memory. The test and single-process sink.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records appended so far, in append order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<String, LifecycleError> {
        let id = record.id.clone();
        self.records.lock().await.push(record);
        Ok(id)
    }
}

/// Writes audit records as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLog<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLog<W> {
    /// Create a new JSON lines audit log writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLog for JsonLinesAuditLog<W> {
    async fn append(&self, record: AuditRecord) -> Result<String, LifecycleError> {
        let id = record.id.clone();
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(id)
    }
}

/// An audit log that emits structured events via the [`tracing`] framework.
///
/// Records are logged at `INFO` level with `audit = true` for easy filtering.
/// Use `RUST_LOG=corral=info` to capture all audit events.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<String, LifecycleError> {
        tracing::info!(
            audit = true,
            record_id = %record.id,
            requester = %record.requester,
            action = ?record.action,
            inputs = %record.inputs,
            result = %record.result,
            "audit"
        );
        Ok(record.id)
    }
}
