#![warn(missing_docs)]

//! # corral-config
//!
//! Configuration loading for the Corral sandbox broker.
//!
//! Supports TOML configuration files with environment variable expansion.
//!
//! ## Example
//!
//! ```toml
//! [approvers]
//! allowed = ["alice@example.com", "bob@example.com"]
//!
//! [backend]
//! binary = "k3d"
//! wait = true
//! test_command = "scripts/run_demo_test.sh"
//!
//! [artifacts]
//! kubeconfig_dir = "kubeconfigs"
//!
//! [defaults]
//! servers = 1
//! agents = 1
//! ttl_minutes = 60
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Corral configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorralConfig {
    /// Approval gate settings.
    #[serde(default)]
    pub approvers: ApproverConfig,

    /// Provisioning backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Credential artifact settings.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Per-request defaults applied when a creation request omits a value.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// The authorized-approver set. Configuration, not code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproverConfig {
    /// Identities allowed to approve a sandbox.
    #[serde(default)]
    pub allowed: Vec<String>,
}

/// Settings for the external cluster-management tool.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Path or name of the cluster tool binary.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Whether cluster creation blocks until the cluster is ready.
    #[serde(default = "default_wait")]
    pub wait: bool,

    /// Command executed by `run_test` against a provisioned sandbox.
    #[serde(default)]
    pub test_command: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            wait: default_wait(),
            test_command: None,
        }
    }
}

/// Where kubeconfig artifacts are written.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Directory holding per-cluster kubeconfig files (mode 0600 on unix).
    #[serde(default = "default_kubeconfig_dir")]
    pub kubeconfig_dir: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            kubeconfig_dir: default_kubeconfig_dir(),
        }
    }
}

/// Defaults for creation requests.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    /// Server node count.
    #[serde(default = "default_servers")]
    pub servers: u32,

    /// Agent node count.
    #[serde(default = "default_agents")]
    pub agents: u32,

    /// Recorded sandbox lifetime. Expiry is recorded, never enforced here.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            agents: default_agents(),
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

fn default_binary() -> String {
    "k3d".to_string()
}

fn default_wait() -> bool {
    true
}

fn default_kubeconfig_dir() -> String {
    "kubeconfigs".to_string()
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

impl CorralConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CorralConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.approvers.allowed.is_empty() {
            return Err(ConfigError::Invalid(
                "approvers.allowed must list at least one identity".to_string(),
            ));
        }
        if self.approvers.allowed.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "approvers.allowed must not contain empty identities".to_string(),
            ));
        }
        if self.backend.binary.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend.binary must not be empty".to_string(),
            ));
        }
        if self.defaults.servers == 0 {
            return Err(ConfigError::Invalid(
                "defaults.servers must be at least 1".to_string(),
            ));
        }
        if self.defaults.ttl_minutes == 0 {
            return Err(ConfigError::Invalid(
                "defaults.ttl_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` references in a string with environment values.
///
/// Unknown variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for nc in chars.by_ref() {
                if nc == '}' {
                    closed = true;
                    break;
                }
                var_name.push(nc);
            }
            if closed {
                match std::env::var(&var_name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(&var_name);
                        result.push('}');
                    }
                }
            } else {
                result.push_str("${");
                result.push_str(&var_name);
            }
        } else {
            result.push(c);
        }
    }

    result
}
