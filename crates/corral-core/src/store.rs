//! Persisted repository of sandbox and approval records.
//!
//! The store is the single source of truth for lifecycle state. The engine
//! behind it only needs atomic single-row read/write; every compound
//! read-modify-write is expressed as a compare-and-set with an
//! expected-status guard so concurrent transitions cannot lose updates.

use std::collections::HashMap;

use async_trait::async_trait;
use corral_error::LifecycleError;
use tokio::sync::Mutex;

use crate::types::{Approval, Sandbox, SandboxStatus};

/// Fields applied to a sandbox row in one guarded update.
#[derive(Debug, Clone, Default)]
pub struct SandboxUpdate {
    /// New status, if the transition guard passes.
    pub status: Option<SandboxStatus>,
    /// Credential handle reference to record.
    pub kubeconfig_ref: Option<String>,
}

impl SandboxUpdate {
    /// An update that only moves the status.
    pub fn status(status: SandboxStatus) -> Self {
        Self {
            status: Some(status),
            kubeconfig_ref: None,
        }
    }
}

/// Repository of [`Sandbox`] and [`Approval`] records.
#[async_trait]
pub trait SandboxStore: Send + Sync {
    /// Persist a sandbox and its paired approval in one atomic step.
    async fn create_pair(
        &self,
        sandbox: Sandbox,
        approval: Approval,
    ) -> Result<(), LifecycleError>;

    /// Fetch a sandbox row.
    async fn sandbox(&self, id: &str) -> Result<Sandbox, LifecycleError>;

    /// Fetch an approval row.
    async fn approval(&self, id: &str) -> Result<Approval, LifecycleError>;

    /// Apply `update` to a sandbox row only if its current status is in
    /// `expected`; otherwise fail with `Conflict` naming `operation`.
    ///
    /// Returns the updated row.
    async fn update_sandbox(
        &self,
        id: &str,
        expected: &[SandboxStatus],
        update: SandboxUpdate,
        operation: &str,
    ) -> Result<Sandbox, LifecycleError>;

    /// Flip an approval unapproved → approved, recording the approver.
    ///
    /// Fails with `AlreadyApproved` if the flip already happened.
    async fn mark_approved(
        &self,
        approval_id: &str,
        approver: &str,
    ) -> Result<Approval, LifecycleError>;
}

#[derive(Default)]
struct Inner {
    sandboxes: HashMap<String, Sandbox>,
    approvals: HashMap<String, Approval>,
}

/// In-memory [`SandboxStore`] backed by a single async mutex.
///
/// The reference implementation: one lock over both collections makes the
/// pair insert and each row update trivially atomic. Suitable for tests and
/// single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn create_pair(
        &self,
        sandbox: Sandbox,
        approval: Approval,
    ) -> Result<(), LifecycleError> {
        let mut inner = self.inner.lock().await;
        if inner.sandboxes.contains_key(&sandbox.id) {
            return Err(anyhow::anyhow!("duplicate sandbox id: {}", sandbox.id).into());
        }
        if inner.approvals.contains_key(&approval.id) {
            return Err(anyhow::anyhow!("duplicate approval id: {}", approval.id).into());
        }
        inner.sandboxes.insert(sandbox.id.clone(), sandbox);
        inner.approvals.insert(approval.id.clone(), approval);
        Ok(())
    }

    async fn sandbox(&self, id: &str) -> Result<Sandbox, LifecycleError> {
        let inner = self.inner.lock().await;
        inner
            .sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::SandboxNotFound(id.to_string()))
    }

    async fn approval(&self, id: &str) -> Result<Approval, LifecycleError> {
        let inner = self.inner.lock().await;
        inner
            .approvals
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::ApprovalNotFound(id.to_string()))
    }

    async fn update_sandbox(
        &self,
        id: &str,
        expected: &[SandboxStatus],
        update: SandboxUpdate,
        operation: &str,
    ) -> Result<Sandbox, LifecycleError> {
        let mut inner = self.inner.lock().await;
        let sandbox = inner
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| LifecycleError::SandboxNotFound(id.to_string()))?;

        if !expected.contains(&sandbox.status) {
            return Err(LifecycleError::Conflict {
                id: id.to_string(),
                status: sandbox.status.to_string(),
                operation: operation.to_string(),
            });
        }

        if let Some(status) = update.status {
            sandbox.status = status;
        }
        if let Some(kubeconfig_ref) = update.kubeconfig_ref {
            sandbox.kubeconfig_ref = Some(kubeconfig_ref);
        }
        Ok(sandbox.clone())
    }

    async fn mark_approved(
        &self,
        approval_id: &str,
        approver: &str,
    ) -> Result<Approval, LifecycleError> {
        let mut inner = self.inner.lock().await;
        let approval = inner
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| LifecycleError::ApprovalNotFound(approval_id.to_string()))?;

        if approval.approved {
            return Err(LifecycleError::AlreadyApproved(approval_id.to_string()));
        }

        approval.approved = true;
        approval.approver = Some(approver.to_string());
        Ok(approval.clone())
    }
}
