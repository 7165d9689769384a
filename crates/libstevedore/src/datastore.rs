//! On-disk layout owned by the orchestrator.
//!
//! ```text
//! <data-root>/
//!   containers/<namespace>/<id>/   per-container state directory
//!   names/<namespace>/<name>       name registry (file contains owning ID)
//! ```
//!
//! The layout is deliberately on disk, not in memory: invocations are
//! short-lived and coordinate across processes through it. A `DataStore`
//! handle is passed through every entry point instead of a global.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StevedoreError};

pub const RESOLV_CONF: &str = "resolv.conf";
pub const HOSTS_FILE: &str = "hosts";
pub const LOG_CONFIG: &str = "log-config.json";

#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    /// Opens (creating if necessary) the data root. The directory is only
    /// accessible to the owning user.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_dir_private(&root)?;
        create_dir_private(&root.join("containers"))?;
        create_dir_private(&root.join("names"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names_root(&self) -> PathBuf {
        self.root.join("names")
    }

    /// Path of the state directory for a container, without creating it.
    pub fn container_dir(&self, namespace: &str, id: &str) -> Result<PathBuf> {
        validate_namespace(namespace)?;
        Ok(self
            .root
            .join("containers")
            .join(namespace)
            .join(id))
    }

    /// Creates the state directory for a container with mode 0700.
    ///
    /// Callers serialise per container ID; there is no locking here.
    pub fn allocate(&self, namespace: &str, id: &str) -> Result<PathBuf> {
        let dir = self.container_dir(namespace, id)?;
        create_dir_private(dir.parent().expect("container dir has a parent"))?;
        create_dir_private(&dir)?;
        tracing::debug!(?dir, "allocated state directory");
        Ok(dir)
    }

    /// Removes a state directory tree. A directory that is already gone is
    /// treated as success.
    pub fn destroy(&self, dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(StevedoreError::InvalidInput(
            "namespace must not be empty".into(),
        ));
    }
    if namespace.contains('/') {
        return Err(StevedoreError::InvalidInput(format!(
            "namespace must not contain '/': {namespace}"
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_private(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match fs::DirBuilder::new().recursive(true).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn create_dir_private(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_destroy() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = DataStore::open(tmp.path().join("root"))?;

        let dir = store.allocate("default", "deadbeef")?;
        assert!(dir.is_dir());
        assert!(dir.ends_with("containers/default/deadbeef"));

        store.destroy(&dir)?;
        assert!(!dir.exists());
        // second destroy is a no-op
        store.destroy(&dir)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_state_dir_mode() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir()?;
        let store = DataStore::open(tmp.path().join("root"))?;
        let dir = store.allocate("default", "cafe")?;
        let mode = fs::metadata(&dir)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        Ok(())
    }

    #[test]
    fn test_namespace_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DataStore::open(tmp.path()).unwrap();
        assert!(store.allocate("", "id").is_err());
        assert!(store.allocate("foo/bar", "id").is_err());
    }
}
