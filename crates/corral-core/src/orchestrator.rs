//! The lifecycle state machine.
//!
//! Owns every status transition, dispatches fire-and-forget provisioning and
//! teardown tasks, and writes one audit record per transition. Request paths
//! (`approve`, `destroy`) validate and return synchronously; the blocking
//! calls into the [`ProvisioningBackend`] run only inside spawned tasks.
//!
//! Every read-modify-write on a sandbox runs under that id's lock (see
//! [`locks`](crate::locks)) plus the store's expected-status guard, so a
//! destroy request cannot race a still-running provisioning task.

use std::sync::Arc;

use corral_error::LifecycleError;
use serde_json::json;

use crate::artifact::KubeconfigStore;
use crate::audit::{AuditAction, AuditLog, AuditRecord, SYSTEM_REQUESTER};
use crate::locks::SandboxLocks;
use crate::store::{SandboxStore, SandboxUpdate};
use crate::types::{Approval, Sandbox, SandboxStatus};
use crate::ProvisioningBackend;

/// Coordinates approval, asynchronous provisioning/teardown, and the audit
/// trail for every sandbox transition.
pub struct LifecycleOrchestrator {
    store: Arc<dyn SandboxStore>,
    audit: Arc<dyn AuditLog>,
    backend: Arc<dyn ProvisioningBackend>,
    artifacts: Arc<KubeconfigStore>,
    locks: SandboxLocks,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        store: Arc<dyn SandboxStore>,
        audit: Arc<dyn AuditLog>,
        backend: Arc<dyn ProvisioningBackend>,
        artifacts: Arc<KubeconfigStore>,
    ) -> Self {
        Self {
            store,
            audit,
            backend,
            artifacts,
            locks: SandboxLocks::default(),
        }
    }

    /// The approve transition: PENDING_APPROVAL → CREATING.
    ///
    /// Flips the approval, moves the status, writes the audit record, and
    /// dispatches the provisioning task — all before returning. Fails with
    /// `AlreadyApproved`/`Conflict` if either guard rejects; state is
    /// unchanged in that case.
    pub async fn approve(
        self: &Arc<Self>,
        approval: &Approval,
        approver: &str,
    ) -> Result<Sandbox, LifecycleError> {
        let _guard = self.locks.acquire(&approval.sandbox_id).await;

        let approval = self.store.mark_approved(&approval.id, approver).await?;
        let sandbox = self
            .store
            .update_sandbox(
                &approval.sandbox_id,
                &[SandboxStatus::PendingApproval],
                SandboxUpdate::status(SandboxStatus::Creating),
                "approve",
            )
            .await?;

        self.audit
            .append_or_warn(AuditRecord::new(
                approver,
                AuditAction::Approve,
                json!({ "approval_id": approval.id }),
                json!({ "sandbox_id": sandbox.id, "status": "APPROVED" }),
            ))
            .await;

        tracing::info!(
            sandbox_id = %sandbox.id,
            approver = %approver,
            "approved, dispatching provisioning"
        );

        let this = Arc::clone(self);
        let sandbox_id = sandbox.id.clone();
        tokio::spawn(async move { this.provision(sandbox_id).await });

        Ok(sandbox)
    }

    /// The destroy transition: {ACTIVE | FAILED} → DESTROYING.
    ///
    /// Any other status fails with `Conflict`. On success the teardown task
    /// is dispatched and the audit record written before returning.
    pub async fn destroy(
        self: &Arc<Self>,
        sandbox_id: &str,
        requester: &str,
    ) -> Result<Sandbox, LifecycleError> {
        let _guard = self.locks.acquire(sandbox_id).await;

        let sandbox = self
            .store
            .update_sandbox(
                sandbox_id,
                &[SandboxStatus::Active, SandboxStatus::Failed],
                SandboxUpdate::status(SandboxStatus::Destroying),
                "destroy",
            )
            .await?;

        self.audit
            .append_or_warn(AuditRecord::new(
                requester,
                AuditAction::DestroyRequest,
                json!({ "sandbox_id": sandbox.id }),
                json!({ "status": "DESTROYING" }),
            ))
            .await;

        tracing::info!(sandbox_id = %sandbox.id, "destroying, dispatching teardown");

        let this = Arc::clone(self);
        let sandbox_id = sandbox.id.clone();
        tokio::spawn(async move { this.teardown(sandbox_id).await });

        Ok(sandbox)
    }

    /// Asynchronous provisioning: CREATING → {ACTIVE | FAILED}.
    ///
    /// Backend failure and artifact write failure both force FAILED. Exactly
    /// one audit record is written for the outcome. Errors never propagate
    /// to the approver, who already received an acknowledgment.
    async fn provision(self: Arc<Self>, sandbox_id: String) {
        let _guard = self.locks.acquire(&sandbox_id).await;

        let sandbox = match self.store.sandbox(&sandbox_id).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox_id, error = %e, "provisioning target vanished");
                return;
            }
        };
        let cluster = sandbox.cluster_name();

        tracing::info!(
            sandbox_id = %sandbox_id,
            cluster = %cluster,
            servers = sandbox.servers,
            agents = sandbox.agents,
            "provisioning cluster"
        );

        let credential = match self
            .backend
            .create(&cluster, sandbox.servers, sandbox.agents)
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                self.fail_provision(&sandbox_id, &cluster, &e.to_string()).await;
                return;
            }
        };

        // Persisting the handle is part of provisioning: an I/O failure
        // here forces FAILED, never a silently missing credential.
        let path = match self.artifacts.write(&cluster, &credential).await {
            Ok(path) => path,
            Err(e) => {
                self.fail_provision(&sandbox_id, &cluster, &e.to_string()).await;
                return;
            }
        };
        let reference = path.display().to_string();

        let transition = self
            .store
            .update_sandbox(
                &sandbox_id,
                &[SandboxStatus::Creating],
                SandboxUpdate {
                    status: Some(SandboxStatus::Active),
                    kubeconfig_ref: Some(reference.clone()),
                },
                "provision",
            )
            .await;

        match transition {
            Ok(_) => {
                tracing::info!(sandbox_id = %sandbox_id, cluster = %cluster, "sandbox active");
                self.audit
                    .append_or_warn(AuditRecord::new(
                        SYSTEM_REQUESTER,
                        AuditAction::ProvisionComplete,
                        json!({ "cluster": cluster }),
                        json!({ "kubeconfig_ref": reference }),
                    ))
                    .await;
            }
            Err(e) => {
                self.fail_provision(&sandbox_id, &cluster, &e.to_string()).await;
            }
        }
    }

    /// Record a failed provisioning attempt: status FAILED plus one audit record.
    async fn fail_provision(&self, sandbox_id: &str, cluster: &str, error: &str) {
        tracing::warn!(
            sandbox_id = %sandbox_id,
            cluster = %cluster,
            error = %error,
            "provisioning failed"
        );

        if let Err(e) = self
            .store
            .update_sandbox(
                sandbox_id,
                &[SandboxStatus::Creating],
                SandboxUpdate::status(SandboxStatus::Failed),
                "provision",
            )
            .await
        {
            tracing::warn!(sandbox_id = %sandbox_id, error = %e, "could not persist FAILED status");
        }

        self.audit
            .append_or_warn(AuditRecord::new(
                SYSTEM_REQUESTER,
                AuditAction::ProvisionFailed,
                json!({ "cluster": cluster }),
                json!({ "error": error }),
            ))
            .await;
    }

    /// Asynchronous teardown: DESTROYING → DESTROYED.
    ///
    /// Best effort, no retry: a backend delete failure is recorded in the
    /// audit payload but does not block termination, so the underlying
    /// cluster can leak — the audit trail is where that shows up.
    async fn teardown(self: Arc<Self>, sandbox_id: String) {
        let _guard = self.locks.acquire(&sandbox_id).await;

        let sandbox = match self.store.sandbox(&sandbox_id).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox_id, error = %e, "teardown target vanished");
                return;
            }
        };
        let cluster = sandbox.cluster_name();

        let delete_result = self.backend.delete(&cluster).await;
        if let Err(e) = &delete_result {
            tracing::warn!(
                sandbox_id = %sandbox_id,
                cluster = %cluster,
                error = %e,
                "backend delete failed, terminating anyway"
            );
        }

        let artifact_removed = match &sandbox.kubeconfig_ref {
            Some(reference) => self.artifacts.remove(reference).await.is_ok(),
            None => false,
        };

        if let Err(e) = self
            .store
            .update_sandbox(
                &sandbox_id,
                &[SandboxStatus::Destroying],
                SandboxUpdate::status(SandboxStatus::Destroyed),
                "teardown",
            )
            .await
        {
            tracing::warn!(sandbox_id = %sandbox_id, error = %e, "could not persist DESTROYED status");
        }

        self.audit
            .append_or_warn(AuditRecord::new(
                SYSTEM_REQUESTER,
                AuditAction::DestroyComplete,
                json!({ "sandbox_id": sandbox_id, "cluster": cluster }),
                json!({
                    "cluster_deleted": delete_result.is_ok(),
                    "delete_error": delete_result.as_ref().err().map(ToString::to_string),
                    "artifact_removed": artifact_removed,
                }),
            ))
            .await;

        tracing::info!(sandbox_id = %sandbox_id, "sandbox destroyed");
        self.locks.discard(&sandbox_id).await;
    }
}
