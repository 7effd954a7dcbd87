//! Core record types: [`Sandbox`], [`Approval`], and the status state machine.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a sandbox.
///
/// Transitions are monotonic:
///
/// ```text
/// PENDING_APPROVAL → CREATING → { ACTIVE | FAILED } → DESTROYING → DESTROYED
/// ```
///
/// DESTROYED is terminal. FAILED is terminal only with respect to
/// provisioning — it remains a valid source for destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxStatus {
    /// Created, waiting for a human approval.
    PendingApproval,
    /// Approved; an asynchronous provisioning task is running.
    Creating,
    /// Provisioned and reachable through its credential handle.
    Active,
    /// Provisioning failed; still destroyable.
    Failed,
    /// Teardown dispatched, not yet complete.
    Destroying,
    /// Terminal. Underlying cluster deleted (best effort).
    Destroyed,
}

impl SandboxStatus {
    /// Whether the state machine permits a direct transition to `to`.
    ///
    /// No transition skips an intermediate state.
    pub fn can_transition_to(self, to: SandboxStatus) -> bool {
        use SandboxStatus::*;
        matches!(
            (self, to),
            (PendingApproval, Creating)
                | (Creating, Active)
                | (Creating, Failed)
                | (Active, Destroying)
                | (Failed, Destroying)
                | (Destroying, Destroyed)
        )
    }

    /// Whether a destroy request is accepted from this status.
    pub fn can_destroy(self) -> bool {
        matches!(self, SandboxStatus::Active | SandboxStatus::Failed)
    }

    /// Whether this status is terminal for the whole lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxStatus::Destroyed)
    }

    /// The wire representation, matching the persisted SCREAMING_SNAKE form.
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxStatus::PendingApproval => "PENDING_APPROVAL",
            SandboxStatus::Creating => "CREATING",
            SandboxStatus::Active => "ACTIVE",
            SandboxStatus::Failed => "FAILED",
            SandboxStatus::Destroying => "DESTROYING",
            SandboxStatus::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ephemeral, isolated compute environment managed through this lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Opaque unique token.
    pub id: String,
    /// Human-readable name from the creation request.
    pub name: String,
    /// Current lifecycle status.
    pub status: SandboxStatus,
    /// Server node count requested at creation.
    pub servers: u32,
    /// Agent node count requested at creation.
    pub agents: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Recorded expiry. No reaping policy is enforced here.
    pub expires_at: DateTime<Utc>,
    /// Credential handle reference, set exactly when the sandbox first
    /// reaches ACTIVE and never cleared afterwards. The underlying artifact
    /// is deleted on teardown, so a stale reference may remain — consult
    /// `status`, not this field, to decide validity.
    pub kubeconfig_ref: Option<String>,
    /// Identity that requested the sandbox.
    pub owner: String,
}

impl Sandbox {
    /// Create a new sandbox in PENDING_APPROVAL with a fresh id.
    pub fn new(
        name: impl Into<String>,
        servers: u32,
        agents: u32,
        ttl_minutes: u32,
        owner: impl Into<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: SandboxStatus::PendingApproval,
            servers,
            agents,
            created_at,
            expires_at: created_at + Duration::minutes(i64::from(ttl_minutes)),
            kubeconfig_ref: None,
            owner: owner.into(),
        }
    }

    /// Derived cluster identifier: `sandbox-` plus the first 8 id chars.
    pub fn cluster_name(&self) -> String {
        let short = self.id.get(..8).unwrap_or(self.id.as_str());
        format!("sandbox-{short}")
    }
}

/// An authorization record gating a sandbox's transition from pending to
/// provisioning. Mutated at most once (unapproved → approved), never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Opaque unique token.
    pub id: String,
    /// The sandbox this approval gates. A reference, not ownership.
    pub sandbox_id: String,
    /// Whether the approval has been granted.
    pub approved: bool,
    /// Identity of the approver, set when granted.
    pub approver: Option<String>,
    /// Creation timestamp (same atomic step as the sandbox).
    pub created_at: DateTime<Utc>,
}

impl Approval {
    /// Create a fresh, unapproved record for a sandbox.
    pub fn new(sandbox_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sandbox_id: sandbox_id.into(),
            approved: false,
            approver: None,
            created_at: Utc::now(),
        }
    }
}

/// Result of running a validation test against a provisioned sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Process exit code. Non-zero is a valid outcome.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}
