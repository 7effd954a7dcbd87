//! The transport-agnostic operation surface.
//!
//! [`SandboxService`] wires the store, gate, orchestrator, audit log, and
//! backend together and exposes the logical operation set. A transport
//! adapter (HTTP, RPC, MCP) maps its requests onto these methods and
//! [`LifecycleError::to_response_body`] onto its error responses.

use std::sync::Arc;

use corral_error::LifecycleError;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::artifact::KubeconfigStore;
use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::gate::{ApprovalGate, Authorizer};
use crate::orchestrator::LifecycleOrchestrator;
use crate::store::SandboxStore;
use crate::types::{Approval, Sandbox, SandboxStatus, TestReport};
use crate::ProvisioningBackend;

/// A sandbox creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSpec {
    /// Human-readable sandbox name.
    pub name: String,
    /// Server node count.
    #[serde(default = "default_servers")]
    pub servers: u32,
    /// Agent node count.
    #[serde(default = "default_agents")]
    pub agents: u32,
    /// Recorded lifetime in minutes. Expiry is recorded, never enforced here.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
    /// Identity requesting the sandbox.
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_servers() -> u32 {
    1
}

fn default_agents() -> u32 {
    1
}

fn default_ttl_minutes() -> u32 {
    60
}

fn default_owner() -> String {
    "unknown".to_string()
}

/// Acknowledgment for a creation request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateReceipt {
    /// The new sandbox id.
    pub sandbox_id: String,
    /// The paired approval id.
    pub approval_id: String,
    /// Always PENDING_APPROVAL.
    pub status: SandboxStatus,
}

/// Acknowledgment for a successful approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApproveReceipt {
    /// The approved sandbox, now CREATING.
    pub sandbox_id: String,
    /// The approval outcome wire string, `"APPROVED"`.
    pub status: String,
}

/// Acknowledgment for an accepted destroy request.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyReceipt {
    /// Always DESTROYING; poll status for DESTROYED.
    pub status: SandboxStatus,
}

/// Point-in-time view of a sandbox for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    /// Sandbox id.
    pub id: String,
    /// Sandbox name.
    pub name: String,
    /// Current status.
    pub status: SandboxStatus,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Recorded expiry.
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Sandbox> for StatusView {
    fn from(sandbox: &Sandbox) -> Self {
        Self {
            id: sandbox.id.clone(),
            name: sandbox.name.clone(),
            status: sandbox.status,
            created_at: sandbox.created_at,
            expires_at: sandbox.expires_at,
        }
    }
}

/// The sandbox broker: creation, approval, status, credentials, tests,
/// destruction.
pub struct SandboxService {
    store: Arc<dyn SandboxStore>,
    audit: Arc<dyn AuditLog>,
    backend: Arc<dyn ProvisioningBackend>,
    artifacts: Arc<KubeconfigStore>,
    gate: ApprovalGate,
    orchestrator: Arc<LifecycleOrchestrator>,
}

impl SandboxService {
    /// Wire a service from its collaborators.
    pub fn new(
        store: Arc<dyn SandboxStore>,
        audit: Arc<dyn AuditLog>,
        backend: Arc<dyn ProvisioningBackend>,
        artifacts: KubeconfigStore,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let artifacts = Arc::new(artifacts);
        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            Arc::clone(&backend),
            Arc::clone(&artifacts),
        ));
        let gate = ApprovalGate::new(
            Arc::clone(&store),
            authorizer,
            Arc::clone(&orchestrator),
        );
        Self {
            store,
            audit,
            backend,
            artifacts,
            gate,
            orchestrator,
        }
    }

    /// Persist a new sandbox (PENDING_APPROVAL) and its paired, unapproved
    /// approval in one atomic step, and audit the request.
    pub async fn create_sandbox(&self, spec: CreateSpec) -> Result<CreateReceipt, LifecycleError> {
        tracing::info!(name = %spec.name, owner = %spec.owner, "create_sandbox");

        let sandbox = Sandbox::new(&spec.name, spec.servers, spec.agents, spec.ttl_minutes, &spec.owner);
        let approval = Approval::new(&sandbox.id);
        let receipt = CreateReceipt {
            sandbox_id: sandbox.id.clone(),
            approval_id: approval.id.clone(),
            status: sandbox.status,
        };

        // Serialize before committing so a payload error cannot orphan the pair
        let inputs = serde_json::to_value(&spec)?;
        let result = serde_json::to_value(&receipt)?;

        self.store.create_pair(sandbox, approval).await?;

        self.audit
            .append_or_warn(AuditRecord::new(
                &spec.owner,
                AuditAction::CreateSandbox,
                inputs,
                result,
            ))
            .await;

        Ok(receipt)
    }

    /// Approve a sandbox through the gate; on success it is CREATING and a
    /// provisioning task is running. Poll status for the outcome.
    pub async fn approve(
        &self,
        approval_id: &str,
        approver: &str,
    ) -> Result<ApproveReceipt, LifecycleError> {
        let sandbox = self.gate.approve(approval_id, approver).await?;
        Ok(ApproveReceipt {
            sandbox_id: sandbox.id,
            status: "APPROVED".to_string(),
        })
    }

    /// Current status of a sandbox.
    pub async fn get_sandbox_status(&self, sandbox_id: &str) -> Result<StatusView, LifecycleError> {
        let sandbox = self.store.sandbox(sandbox_id).await?;
        Ok(StatusView::from(&sandbox))
    }

    /// Read out the stored credential content.
    ///
    /// Fails with `CredentialNotAvailable` unless the sandbox reached ACTIVE
    /// at least once.
    pub async fn get_kubeconfig(
        &self,
        sandbox_id: &str,
        requester: &str,
    ) -> Result<String, LifecycleError> {
        let sandbox = self.store.sandbox(sandbox_id).await?;
        let reference = sandbox
            .kubeconfig_ref
            .ok_or_else(|| LifecycleError::CredentialNotAvailable(sandbox_id.to_string()))?;

        let content = self.artifacts.read(&reference).await?;

        self.audit
            .append(AuditRecord::new(
                requester,
                AuditAction::GetKubeconfig,
                json!({ "sandbox_id": sandbox_id }),
                json!({ "size": content.len() }),
            ))
            .await?;

        Ok(content)
    }

    /// Run a validation test against a provisioned sandbox.
    ///
    /// A non-zero exit code is reported, not treated as an error.
    pub async fn run_test(
        &self,
        sandbox_id: &str,
        test_id: &str,
        requester: &str,
    ) -> Result<TestReport, LifecycleError> {
        let sandbox = self.store.sandbox(sandbox_id).await?;
        let reference = sandbox
            .kubeconfig_ref
            .ok_or_else(|| LifecycleError::CredentialNotAvailable(sandbox_id.to_string()))?;

        let report = self.backend.run_test(&reference, test_id).await?;

        self.audit
            .append(AuditRecord::new(
                requester,
                AuditAction::RunTest,
                json!({ "sandbox_id": sandbox_id, "test_id": test_id }),
                serde_json::to_value(&report)?,
            ))
            .await?;

        Ok(report)
    }

    /// Request destruction. Accepted only from ACTIVE or FAILED; teardown
    /// completes asynchronously and always reaches DESTROYED.
    pub async fn destroy_sandbox(
        &self,
        sandbox_id: &str,
        requester: &str,
    ) -> Result<DestroyReceipt, LifecycleError> {
        let sandbox = self.orchestrator.destroy(sandbox_id, requester).await?;
        Ok(DestroyReceipt {
            status: sandbox.status,
        })
    }
}
