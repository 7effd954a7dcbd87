#![warn(missing_docs)]

//! # corral-k3d
//!
//! [`ProvisioningBackend`] implementation that shells out to the `k3d` CLI.
//!
//! The orchestrator only sees the create/delete/run-test contract; this crate
//! owns the command shapes:
//!
//! - `k3d cluster create <name> --servers N --agents N [--wait]`
//! - `k3d kubeconfig get <name>` (stdout becomes the credential content)
//! - `k3d cluster delete <name>`
//!
//! `run_test` executes a configured command with the credential path as its
//! first argument, the test id as its second, and `KUBECONFIG` in the
//! environment.

use std::path::PathBuf;

use corral_core::{ProvisioningBackend, TestReport};
use corral_error::LifecycleError;
use tokio::process::Command;

/// Settings for the k3d backend.
#[derive(Debug, Clone)]
pub struct K3dConfig {
    /// Path or name of the k3d binary.
    pub binary: String,
    /// Pass `--wait` so creation blocks until the cluster is ready.
    pub wait: bool,
    /// Command executed by `run_test`; `None` disables test runs.
    pub test_command: Option<PathBuf>,
}

impl Default for K3dConfig {
    fn default() -> Self {
        Self {
            binary: "k3d".to_string(),
            wait: true,
            test_command: None,
        }
    }
}

impl From<&corral_config::BackendConfig> for K3dConfig {
    fn from(config: &corral_config::BackendConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            wait: config.wait,
            test_command: config.test_command.as_ref().map(PathBuf::from),
        }
    }
}

/// A [`ProvisioningBackend`] over the k3d command-line tool.
pub struct K3dBackend {
    config: K3dConfig,
}

impl K3dBackend {
    /// Create a backend with the given settings.
    pub fn new(config: K3dConfig) -> Self {
        Self { config }
    }

    fn create_args(&self, cluster_name: &str, servers: u32, agents: u32) -> Vec<String> {
        let mut args = vec![
            "cluster".to_string(),
            "create".to_string(),
            cluster_name.to_string(),
            "--servers".to_string(),
            servers.to_string(),
            "--agents".to_string(),
            agents.to_string(),
        ];
        if self.config.wait {
            args.push("--wait".to_string());
        }
        args
    }

    fn delete_args(cluster_name: &str) -> Vec<String> {
        vec![
            "cluster".to_string(),
            "delete".to_string(),
            cluster_name.to_string(),
        ]
    }

    fn kubeconfig_args(cluster_name: &str) -> Vec<String> {
        vec![
            "kubeconfig".to_string(),
            "get".to_string(),
            cluster_name.to_string(),
        ]
    }

    /// Run the k3d binary, mapping spawn failures to `Backend`.
    async fn run(
        &self,
        operation: &str,
        args: &[String],
    ) -> Result<std::process::Output, LifecycleError> {
        tracing::debug!(binary = %self.config.binary, ?args, "invoking k3d");
        Command::new(&self.config.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| LifecycleError::Backend {
                operation: operation.to_string(),
                message: format!("failed to invoke {}: {e}", self.config.binary),
            })
    }
}

/// Collapse process output into an error message, preferring stderr.
fn failure_message(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait::async_trait]
impl ProvisioningBackend for K3dBackend {
    async fn create(
        &self,
        cluster_name: &str,
        servers: u32,
        agents: u32,
    ) -> Result<String, LifecycleError> {
        let args = self.create_args(cluster_name, servers, agents);
        let output = self.run("create", &args).await?;
        if !output.status.success() {
            return Err(LifecycleError::Backend {
                operation: "create".to_string(),
                message: failure_message(&output),
            });
        }

        let output = self.run("kubeconfig", &Self::kubeconfig_args(cluster_name)).await?;
        if !output.status.success() {
            return Err(LifecycleError::Backend {
                operation: "kubeconfig".to_string(),
                message: failure_message(&output),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn delete(&self, cluster_name: &str) -> Result<(), LifecycleError> {
        let output = self.run("delete", &Self::delete_args(cluster_name)).await?;
        if !output.status.success() {
            return Err(LifecycleError::Backend {
                operation: "delete".to_string(),
                message: failure_message(&output),
            });
        }
        Ok(())
    }

    async fn run_test(
        &self,
        credential_ref: &str,
        test_id: &str,
    ) -> Result<TestReport, LifecycleError> {
        let command = self
            .config
            .test_command
            .as_ref()
            .ok_or_else(|| LifecycleError::Backend {
                operation: "run_test".to_string(),
                message: "no test command configured".to_string(),
            })?;

        let output = Command::new(command)
            .arg(credential_ref)
            .arg(test_id)
            .env("KUBECONFIG", credential_ref)
            .output()
            .await
            .map_err(|e| LifecycleError::Backend {
                operation: "run_test".to_string(),
                message: format!("failed to invoke {}: {e}", command.display()),
            })?;

        Ok(TestReport {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
