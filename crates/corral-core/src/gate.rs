//! The approval gate: approver authorization plus the approval flip.
//!
//! The authorized-approver set is configuration, not code — it arrives as an
//! injected [`Authorizer`] capability, replaceable in tests.

use std::collections::HashSet;
use std::sync::Arc;

use corral_error::LifecycleError;

use crate::orchestrator::LifecycleOrchestrator;
use crate::store::SandboxStore;
use crate::types::Sandbox;

/// Authorization policy for approver identities.
pub trait Authorizer: Send + Sync {
    /// Whether this identity may approve sandboxes.
    fn is_allowed(&self, identity: &str) -> bool;
}

/// An [`Authorizer`] over a fixed identity set, typically loaded from config.
pub struct StaticAuthorizer {
    allowed: HashSet<String>,
}

impl StaticAuthorizer {
    /// Build from any collection of identities.
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: identities.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_allowed(&self, identity: &str) -> bool {
        self.allowed.contains(identity)
    }
}

/// Validates an approval request and hands off to the orchestrator.
pub struct ApprovalGate {
    store: Arc<dyn SandboxStore>,
    authorizer: Arc<dyn Authorizer>,
    orchestrator: Arc<LifecycleOrchestrator>,
}

impl ApprovalGate {
    /// Create a gate over the given store, policy, and orchestrator.
    pub fn new(
        store: Arc<dyn SandboxStore>,
        authorizer: Arc<dyn Authorizer>,
        orchestrator: Arc<LifecycleOrchestrator>,
    ) -> Self {
        Self {
            store,
            authorizer,
            orchestrator,
        }
    }

    /// Approve a sandbox.
    ///
    /// Fails with `ApprovalNotFound` for an unknown id, `PermissionDenied`
    /// for an unauthorized approver, and `AlreadyApproved` for a repeat
    /// attempt — in every failure case no state is mutated. On success the
    /// orchestrator's approve transition runs (PENDING_APPROVAL → CREATING,
    /// provisioning dispatched, audit written) before this returns.
    pub async fn approve(
        &self,
        approval_id: &str,
        approver: &str,
    ) -> Result<Sandbox, LifecycleError> {
        let approval = self.store.approval(approval_id).await?;

        if !self.authorizer.is_allowed(approver) {
            tracing::warn!(
                approval_id = %approval_id,
                approver = %approver,
                "approval denied: approver not authorized"
            );
            return Err(LifecycleError::PermissionDenied(approver.to_string()));
        }

        if approval.approved {
            return Err(LifecycleError::AlreadyApproved(approval_id.to_string()));
        }

        self.orchestrator.approve(&approval, approver).await
    }
}
