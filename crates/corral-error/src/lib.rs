#![warn(missing_docs)]

//! Typed error types for the Corral sandbox broker.
//!
//! Provides [`LifecycleError`] — the canonical error type for every
//! lifecycle operation (`SandboxStore`, `ApprovalGate`, `ProvisioningBackend`,
//! `LifecycleOrchestrator`, `SandboxService`).

use thiserror::Error;

/// Canonical error type for Corral lifecycle operations.
///
/// Validation errors (`*NotFound`, `PermissionDenied`, `Conflict`,
/// `AlreadyApproved`) are detected synchronously and returned to the caller
/// with state unchanged. `Backend` and `Io` occur inside asynchronous
/// provisioning/teardown tasks and surface only through status polls and
/// audit records, never as a failed call return.
///
/// All variants are `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The requested sandbox does not exist.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// The requested approval does not exist.
    #[error("approval not found: {0}")]
    ApprovalNotFound(String),

    /// No credential handle has been stored for this sandbox yet.
    #[error("kubeconfig not available for sandbox: {0}")]
    CredentialNotAvailable(String),

    /// The approver identity is not in the authorized set.
    #[error("approver not authorized: {0}")]
    PermissionDenied(String),

    /// The operation is invalid for the sandbox's current status.
    #[error("cannot {operation} sandbox '{id}' in state {status}")]
    Conflict {
        /// The sandbox id.
        id: String,
        /// The status the sandbox was in when the operation was rejected.
        status: String,
        /// The operation that was attempted.
        operation: String,
    },

    /// The approval was already granted; approvals flip at most once.
    #[error("approval already granted: {0}")]
    AlreadyApproved(String),

    /// An external provisioning/teardown call failed.
    #[error("backend {operation} failed: {message}")]
    Backend {
        /// The backend operation that failed (create, delete, run_test).
        operation: String,
        /// The error output from the backend.
        message: String,
    },

    /// Persisting or reading a credential artifact failed.
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed to serialize.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SandboxNotFound(_) => "NOT_FOUND",
            Self::ApprovalNotFound(_) => "NOT_FOUND",
            Self::CredentialNotAvailable(_) => "NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Conflict { .. } => "CONFLICT",
            Self::AlreadyApproved(_) => "CONFLICT",
            Self::Backend { .. } => "BACKEND_FAILURE",
            Self::Io(_) => "IO_FAILURE",
            Self::Serialization(_) => "INTERNAL",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the operation that produced this error may succeed if retried.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Io(_))
    }

    /// Convert to a structured JSON error body for transport adapters.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, and `retryable`.
    pub fn to_response_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        })
    }
}

// Compile-time assertion: LifecycleError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<LifecycleError>();
};
