//! End-to-end lifecycle tests driving [`SandboxService`] against the
//! in-memory store, the in-memory audit log, and a scripted backend.
//!
//! Provisioning and teardown run on spawned tasks, so tests that cross an
//! asynchronous boundary poll status until the expected state appears.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use corral_core::audit::MemoryAuditLog;
use corral_core::{
    AuditAction, AuditLog, AuditRecord, Authorizer, CreateSpec, KubeconfigStore, MemoryStore,
    ProvisioningBackend, SandboxService, SandboxStatus, StaticAuthorizer, TestReport,
};
use corral_error::LifecycleError;
use tokio::sync::Mutex;

const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters: []\n";
const APPROVER: &str = "alice@example.com";

/// Backend double that records every call and fails on demand.
#[derive(Default)]
struct ScriptedBackend {
    fail_create: bool,
    fail_delete: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ProvisioningBackend for ScriptedBackend {
    async fn create(
        &self,
        cluster_name: &str,
        servers: u32,
        agents: u32,
    ) -> Result<String, LifecycleError> {
        self.calls
            .lock()
            .await
            .push(format!("create {cluster_name} servers={servers} agents={agents}"));
        if self.fail_create {
            return Err(LifecycleError::Backend {
                operation: "create".to_string(),
                message: "cluster name taken".to_string(),
            });
        }
        Ok(KUBECONFIG.to_string())
    }

    async fn delete(&self, cluster_name: &str) -> Result<(), LifecycleError> {
        self.calls.lock().await.push(format!("delete {cluster_name}"));
        if self.fail_delete {
            return Err(LifecycleError::Backend {
                operation: "delete".to_string(),
                message: "docker daemon unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn run_test(
        &self,
        credential_ref: &str,
        test_id: &str,
    ) -> Result<TestReport, LifecycleError> {
        self.calls
            .lock()
            .await
            .push(format!("run_test {credential_ref} {test_id}"));
        Ok(TestReport {
            exit_code: 0,
            stdout: format!("ran {test_id}\n"),
            stderr: String::new(),
        })
    }
}

struct Harness {
    service: SandboxService,
    audit: Arc<MemoryAuditLog>,
    backend: Arc<ScriptedBackend>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    fn new(backend: ScriptedBackend) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("kubeconfigs");
        Self::with_artifact_dir(backend, dir, tmp)
    }

    fn with_artifact_dir(
        backend: ScriptedBackend,
        dir: PathBuf,
        tmp: tempfile::TempDir,
    ) -> Self {
        let audit = Arc::new(MemoryAuditLog::new());
        let backend = Arc::new(backend);
        let service = SandboxService::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&backend) as Arc<dyn ProvisioningBackend>,
            KubeconfigStore::new(dir),
            Arc::new(StaticAuthorizer::new([APPROVER])),
        );
        Self {
            service,
            audit,
            backend,
            _tmp: tmp,
        }
    }

    async fn audit_actions(&self) -> Vec<AuditAction> {
        self.audit
            .records()
            .await
            .iter()
            .map(|record| record.action)
            .collect()
    }

    async fn last_audit(&self) -> AuditRecord {
        self.audit.records().await.last().cloned().unwrap()
    }

    async fn wait_for_status(&self, sandbox_id: &str, want: SandboxStatus) {
        wait_for_status(&self.service, sandbox_id, want).await;
    }

    /// Poll until an audit record with `action` appears, or fail after 5s.
    ///
    /// Asynchronous tasks persist the new status before appending their
    /// outcome record, so waiting on status alone can observe the log early.
    async fn wait_for_audit(&self, action: AuditAction) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.audit_actions().await.contains(&action) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for audit action {action:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn create(&self, name: &str) -> (String, String) {
        let receipt = self
            .service
            .create_sandbox(spec(name))
            .await
            .unwrap();
        (receipt.sandbox_id, receipt.approval_id)
    }

    async fn create_and_activate(&self, name: &str) -> String {
        let (sandbox_id, approval_id) = self.create(name).await;
        self.service.approve(&approval_id, APPROVER).await.unwrap();
        self.wait_for_status(&sandbox_id, SandboxStatus::Active).await;
        self.wait_for_audit(AuditAction::ProvisionComplete).await;
        sandbox_id
    }
}

/// Poll status until the sandbox reaches `want`, or fail after 5s.
async fn wait_for_status(service: &SandboxService, sandbox_id: &str, want: SandboxStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let view = service.get_sandbox_status(sandbox_id).await.unwrap();
        if view.status == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want}, stuck at {}",
            view.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spec(name: &str) -> CreateSpec {
    CreateSpec {
        name: name.to_string(),
        servers: 1,
        agents: 2,
        ttl_minutes: 30,
        owner: "dev@example.com".to_string(),
    }
}

#[tokio::test]
async fn create_returns_pending_with_paired_approval() {
    let h = Harness::new(ScriptedBackend::default());

    let receipt = h.service.create_sandbox(spec("demo")).await.unwrap();
    assert_eq!(receipt.status, SandboxStatus::PendingApproval);
    assert!(!receipt.sandbox_id.is_empty());
    assert!(!receipt.approval_id.is_empty());

    let view = h.service.get_sandbox_status(&receipt.sandbox_id).await.unwrap();
    assert_eq!(view.status, SandboxStatus::PendingApproval);
    assert_eq!(view.name, "demo");
    assert!(view.expires_at > view.created_at);

    // Nothing runs until approval
    assert!(h.backend.calls().await.is_empty());

    let records = h.audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::CreateSandbox);
    assert_eq!(records[0].requester, "dev@example.com");
    assert_eq!(records[0].inputs["name"], "demo");
    assert_eq!(records[0].result["sandbox_id"], receipt.sandbox_id);
}

#[tokio::test]
async fn create_spec_defaults_fill_in() {
    let parsed: CreateSpec = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
    assert_eq!(parsed.servers, 1);
    assert_eq!(parsed.agents, 1);
    assert_eq!(parsed.ttl_minutes, 60);
    assert_eq!(parsed.owner, "unknown");
}

#[tokio::test]
async fn approve_unknown_approval_is_not_found() {
    let h = Harness::new(ScriptedBackend::default());
    let err = h.service.approve("no-such-approval", APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn unauthorized_approver_denied_without_side_effects() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, approval_id) = h.create("demo").await;

    let err = h
        .service
        .approve(&approval_id, "mallory@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PERMISSION_DENIED");

    // Denial mutates nothing: still pending, no backend call, no new audit
    let view = h.service.get_sandbox_status(&sandbox_id).await.unwrap();
    assert_eq!(view.status, SandboxStatus::PendingApproval);
    assert!(h.backend.calls().await.is_empty());
    assert_eq!(h.audit_actions().await, vec![AuditAction::CreateSandbox]);

    // And an authorized approver can still proceed afterwards
    let receipt = h.service.approve(&approval_id, APPROVER).await.unwrap();
    assert_eq!(receipt.status, "APPROVED");
}

#[tokio::test]
async fn approved_sandbox_provisions_to_active() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, approval_id) = h.create("demo").await;

    let receipt = h.service.approve(&approval_id, APPROVER).await.unwrap();
    assert_eq!(receipt.sandbox_id, sandbox_id);
    assert_eq!(receipt.status, "APPROVED");

    h.wait_for_status(&sandbox_id, SandboxStatus::Active).await;
    h.wait_for_audit(AuditAction::ProvisionComplete).await;

    let content = h.service.get_kubeconfig(&sandbox_id, APPROVER).await.unwrap();
    assert_eq!(content, KUBECONFIG);

    // Cluster name derives from the first eight id characters
    let short = &sandbox_id[..8];
    assert_eq!(
        h.backend.calls().await,
        vec![format!("create sandbox-{short} servers=1 agents=2")]
    );

    assert_eq!(
        h.audit_actions().await,
        vec![
            AuditAction::CreateSandbox,
            AuditAction::Approve,
            AuditAction::ProvisionComplete,
            AuditAction::GetKubeconfig,
        ]
    );

    let records = h.audit.records().await;
    assert_eq!(records[1].requester, APPROVER);
    assert_eq!(records[1].result["status"], "APPROVED");
    assert_eq!(records[2].requester, "system");
    assert!(records[2].result["kubeconfig_ref"]
        .as_str()
        .unwrap()
        .contains(&format!("kubeconfig-sandbox-{short}")));
}

#[tokio::test]
async fn repeat_approve_is_conflict() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, approval_id) = h.create("demo").await;

    h.service.approve(&approval_id, APPROVER).await.unwrap();
    let err = h.service.approve(&approval_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    // The first approval's provisioning still completes
    h.wait_for_status(&sandbox_id, SandboxStatus::Active).await;
    assert_eq!(h.backend.calls().await.len(), 1);
}

#[tokio::test]
async fn backend_create_failure_marks_failed() {
    let h = Harness::new(ScriptedBackend {
        fail_create: true,
        ..ScriptedBackend::default()
    });
    let (sandbox_id, approval_id) = h.create("demo").await;

    // The approval itself still succeeds; the failure is asynchronous
    let receipt = h.service.approve(&approval_id, APPROVER).await.unwrap();
    assert_eq!(receipt.status, "APPROVED");

    h.wait_for_status(&sandbox_id, SandboxStatus::Failed).await;
    h.wait_for_audit(AuditAction::ProvisionFailed).await;

    let err = h.service.get_kubeconfig(&sandbox_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    assert_eq!(
        h.audit_actions().await,
        vec![
            AuditAction::CreateSandbox,
            AuditAction::Approve,
            AuditAction::ProvisionFailed,
        ]
    );
    let failure = h.last_audit().await;
    assert_eq!(failure.requester, "system");
    assert!(failure.result["error"]
        .as_str()
        .unwrap()
        .contains("cluster name taken"));
}

#[tokio::test]
async fn failed_sandbox_is_destroyable() {
    let h = Harness::new(ScriptedBackend {
        fail_create: true,
        ..ScriptedBackend::default()
    });
    let (sandbox_id, approval_id) = h.create("demo").await;
    h.service.approve(&approval_id, APPROVER).await.unwrap();
    h.wait_for_status(&sandbox_id, SandboxStatus::Failed).await;

    let receipt = h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap();
    assert_eq!(receipt.status, SandboxStatus::Destroying);
    h.wait_for_status(&sandbox_id, SandboxStatus::Destroyed).await;
}

#[tokio::test]
async fn destroy_before_active_is_conflict() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, _approval_id) = h.create("demo").await;

    let err = h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert!(err.to_string().contains("PENDING_APPROVAL"));

    let view = h.service.get_sandbox_status(&sandbox_id).await.unwrap();
    assert_eq!(view.status, SandboxStatus::PendingApproval);
    assert_eq!(h.audit_actions().await, vec![AuditAction::CreateSandbox]);
}

#[tokio::test]
async fn destroy_unknown_sandbox_is_not_found() {
    let h = Harness::new(ScriptedBackend::default());
    let err = h.service.destroy_sandbox("no-such-id", APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn destroy_active_reaches_destroyed_and_removes_artifact() {
    let h = Harness::new(ScriptedBackend::default());
    let sandbox_id = h.create_and_activate("demo").await;
    let short = &sandbox_id[..8];

    let receipt = h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap();
    assert_eq!(receipt.status, SandboxStatus::Destroying);

    h.wait_for_status(&sandbox_id, SandboxStatus::Destroyed).await;
    h.wait_for_audit(AuditAction::DestroyComplete).await;

    let calls = h.backend.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], format!("delete sandbox-{short}"));

    let complete = h.last_audit().await;
    assert_eq!(complete.action, AuditAction::DestroyComplete);
    assert_eq!(complete.requester, "system");
    assert_eq!(complete.result["cluster_deleted"], true);
    assert_eq!(complete.result["artifact_removed"], true);
    assert!(complete.result["delete_error"].is_null());

    // The artifact is gone even though the stored reference survives
    let err = h.service.get_kubeconfig(&sandbox_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "IO_FAILURE");
}

#[tokio::test]
async fn teardown_survives_backend_delete_failure() {
    let h = Harness::new(ScriptedBackend {
        fail_delete: true,
        ..ScriptedBackend::default()
    });
    let sandbox_id = h.create_and_activate("demo").await;

    h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap();
    h.wait_for_status(&sandbox_id, SandboxStatus::Destroyed).await;
    h.wait_for_audit(AuditAction::DestroyComplete).await;

    // The leak is recorded, not retried
    let complete = h.last_audit().await;
    assert_eq!(complete.action, AuditAction::DestroyComplete);
    assert_eq!(complete.result["cluster_deleted"], false);
    assert!(complete.result["delete_error"]
        .as_str()
        .unwrap()
        .contains("docker daemon unreachable"));
}

#[tokio::test]
async fn destroyed_sandbox_rejects_further_destroys() {
    let h = Harness::new(ScriptedBackend::default());
    let sandbox_id = h.create_and_activate("demo").await;

    h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap();
    h.wait_for_status(&sandbox_id, SandboxStatus::Destroyed).await;

    let err = h.service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert!(err.to_string().contains("DESTROYED"));
}

#[tokio::test]
async fn run_test_reports_and_audits() {
    let h = Harness::new(ScriptedBackend::default());
    let sandbox_id = h.create_and_activate("demo").await;

    let report = h
        .service
        .run_test(&sandbox_id, "smoke", "dev@example.com")
        .await
        .unwrap();
    assert_eq!(report.exit_code, 0);
    assert!(report.stdout.contains("ran smoke"));

    let record = h.last_audit().await;
    assert_eq!(record.action, AuditAction::RunTest);
    assert_eq!(record.requester, "dev@example.com");
    assert_eq!(record.inputs["test_id"], "smoke");
    assert_eq!(record.result["exit_code"], 0);
}

#[tokio::test]
async fn run_test_before_active_is_not_found() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, _approval_id) = h.create("demo").await;

    let err = h
        .service
        .run_test(&sandbox_id, "smoke", "dev@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert!(err.to_string().contains("kubeconfig not available"));
}

#[tokio::test]
async fn artifact_write_failure_marks_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocked");
    std::fs::write(&blocker, "not a directory").unwrap();

    let h = Harness::with_artifact_dir(ScriptedBackend::default(), blocker, tmp);
    let (sandbox_id, approval_id) = h.create("demo").await;
    h.service.approve(&approval_id, APPROVER).await.unwrap();

    h.wait_for_status(&sandbox_id, SandboxStatus::Failed).await;
    h.wait_for_audit(AuditAction::ProvisionFailed).await;

    // The backend succeeded; persisting the credential did not
    assert_eq!(h.backend.calls().await.len(), 1);
    let failure = h.last_audit().await;
    assert_eq!(failure.action, AuditAction::ProvisionFailed);

    let err = h.service.get_kubeconfig(&sandbox_id, APPROVER).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn authorizer_wires_from_config() {
    let config = corral_config::CorralConfig::from_toml(
        r#"
        [approvers]
        allowed = ["ops@example.com"]
        "#,
    )
    .unwrap();

    let authorizer = StaticAuthorizer::new(config.approvers.allowed.clone());
    assert!(authorizer.is_allowed("ops@example.com"));
    assert!(!authorizer.is_allowed("dev@example.com"));
}

#[tokio::test]
async fn audit_sink_failure_never_wedges_the_lifecycle() {
    struct BrokenAuditLog;

    #[async_trait::async_trait]
    impl AuditLog for BrokenAuditLog {
        async fn append(
            &self,
            _record: AuditRecord,
        ) -> Result<String, LifecycleError> {
            Err(LifecycleError::Io(std::io::Error::other("audit disk full")))
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let service = SandboxService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(BrokenAuditLog),
        Arc::clone(&backend) as Arc<dyn ProvisioningBackend>,
        KubeconfigStore::new(tmp.path().join("kubeconfigs")),
        Arc::new(StaticAuthorizer::new([APPROVER])),
    );

    // Every transition must still commit, dispatch, and acknowledge even
    // though no audit record can be persisted.
    let receipt = service.create_sandbox(spec("demo")).await.unwrap();
    let sandbox_id = receipt.sandbox_id;

    let approved = service.approve(&receipt.approval_id, APPROVER).await.unwrap();
    assert_eq!(approved.status, "APPROVED");

    wait_for_status(&service, &sandbox_id, SandboxStatus::Active).await;
    assert_eq!(backend.calls().await.len(), 1);

    let destroyed = service.destroy_sandbox(&sandbox_id, APPROVER).await.unwrap();
    assert_eq!(destroyed.status, SandboxStatus::Destroying);
    wait_for_status(&service, &sandbox_id, SandboxStatus::Destroyed).await;
}

#[tokio::test]
async fn concurrent_approve_and_destroy_keep_transitions_ordered() {
    let h = Harness::new(ScriptedBackend::default());
    let (sandbox_id, approval_id) = h.create("demo").await;

    h.service.approve(&approval_id, APPROVER).await.unwrap();

    // A destroy racing the provisioning task either lands after ACTIVE
    // (accepted) or hits CREATING (rejected); it can never corrupt state.
    match h.service.destroy_sandbox(&sandbox_id, APPROVER).await {
        Ok(receipt) => {
            assert_eq!(receipt.status, SandboxStatus::Destroying);
            h.wait_for_status(&sandbox_id, SandboxStatus::Destroyed).await;
        }
        Err(err) => {
            assert_eq!(err.code(), "CONFLICT");
            h.wait_for_status(&sandbox_id, SandboxStatus::Active).await;
        }
    }
}
