//! Credential artifact storage.
//!
//! Kubeconfigs are written as files under a configured directory, one per
//! cluster, access-restricted to the owning process (mode 0600 on unix).
//! The stored reference is the file path; it may outlive the artifact after
//! teardown, so callers consult sandbox status before trusting it.

use std::path::{Path, PathBuf};

use corral_error::LifecycleError;

/// File-backed store for kubeconfig artifacts, keyed by cluster name.
#[derive(Debug, Clone)]
pub struct KubeconfigStore {
    dir: PathBuf,
}

impl KubeconfigStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist credential content for a cluster and return its reference.
    pub async fn write(
        &self,
        cluster_name: &str,
        content: &str,
    ) -> Result<PathBuf, LifecycleError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("kubeconfig-{cluster_name}"));
        tokio::fs::write(&path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(path)
    }

    /// Read credential content by its stored reference.
    pub async fn read(&self, reference: &str) -> Result<String, LifecycleError> {
        Ok(tokio::fs::read_to_string(reference).await?)
    }

    /// Remove the artifact behind a stored reference.
    pub async fn remove(&self, reference: &str) -> Result<(), LifecycleError> {
        tokio::fs::remove_file(reference).await?;
        Ok(())
    }
}
