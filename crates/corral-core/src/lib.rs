#![warn(missing_docs)]

//! # corral-core
//!
//! Lifecycle orchestration for short-lived, approval-gated compute sandboxes.
//!
//! A creation request persists a [`Sandbox`](types::Sandbox) and its paired
//! [`Approval`](types::Approval) atomically. Once an authorized approver flips
//! the approval, the [`LifecycleOrchestrator`](orchestrator::LifecycleOrchestrator)
//! dispatches an asynchronous provisioning task against a
//! [`ProvisioningBackend`], moving the sandbox to ACTIVE or FAILED. Destruction
//! follows the same shape: a synchronous transition to DESTROYING, then an
//! asynchronous teardown that always terminates in DESTROYED.
//!
//! ## Design rules
//!
//! - **Single source of truth**: all state lives in a [`SandboxStore`](store::SandboxStore);
//!   every read-modify-write runs under a per-sandbox-id lock plus an
//!   expected-status compare-and-set.
//! - **Exactly one audit record** per logical state-changing call, written
//!   synchronously for request-initiated actions and after-the-fact for
//!   asynchronous outcomes.
//! - **No return channel** from background tasks — callers poll status.
//!   Backend and artifact failures inside a task become FAILED (provisioning)
//!   or are recorded in the audit payload (teardown), never propagated.

pub mod artifact;
pub mod audit;
pub mod gate;
pub mod locks;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod types;

pub use artifact::KubeconfigStore;
pub use audit::{AuditAction, AuditLog, AuditRecord};
pub use gate::{ApprovalGate, Authorizer, StaticAuthorizer};
pub use orchestrator::LifecycleOrchestrator;
pub use service::{CreateSpec, SandboxService};
pub use store::{MemoryStore, SandboxStore};
pub use types::{Approval, Sandbox, SandboxStatus, TestReport};

/// Trait for the external capability that creates and destroys the underlying
/// infrastructure for a sandbox.
///
/// The orchestrator treats this strictly as a blocking capability invoked from
/// a background task; its internal mechanism (CLI, API call) is irrelevant.
/// Implementations hold whatever process or connection state they need.
#[async_trait::async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create a cluster and return its credential content (e.g. a kubeconfig).
    ///
    /// - `cluster_name`: the derived cluster identifier
    /// - `servers` / `agents`: node topology
    async fn create(
        &self,
        cluster_name: &str,
        servers: u32,
        agents: u32,
    ) -> Result<String, corral_error::LifecycleError>;

    /// Delete a cluster by its derived identifier.
    async fn delete(&self, cluster_name: &str) -> Result<(), corral_error::LifecycleError>;

    /// Run a validation test against a provisioned cluster.
    ///
    /// - `credential_ref`: the stored credential artifact reference
    /// - `test_id`: an opaque test identifier, recorded in the audit trail
    ///
    /// A non-zero exit code is a valid report, not an error; `Err` means the
    /// test could not be executed at all.
    async fn run_test(
        &self,
        credential_ref: &str,
        test_id: &str,
    ) -> Result<types::TestReport, corral_error::LifecycleError>;
}
