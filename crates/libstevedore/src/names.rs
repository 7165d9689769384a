//! Cross-process container name registry.
//!
//! A name is held by creating `<data-root>/names/<namespace>/<name>` with
//! `O_CREAT|O_EXCL`; the file contains the owning container ID. Atomic
//! creation gives cross-process exclusion without any locking.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::datastore::{validate_namespace, DataStore};
use crate::error::{Result, StevedoreError};
use crate::idgen;

#[derive(Debug, Clone)]
pub struct NameStore {
    root: PathBuf,
}

impl NameStore {
    pub fn new(store: &DataStore) -> Self {
        Self {
            root: store.names_root(),
        }
    }

    fn name_path(&self, namespace: &str, name: &str) -> Result<PathBuf> {
        validate_namespace(namespace)?;
        validate_name(name)?;
        Ok(self.root.join(namespace).join(name))
    }

    /// Acquires `name` for the container `id`. Fails deterministically when
    /// the name is already held.
    pub fn acquire(&self, namespace: &str, name: &str, id: &str) -> Result<()> {
        let path = self.name_path(namespace, name)?;
        fs::create_dir_all(path.parent().expect("name path has a parent"))?;

        // create_new is O_CREAT|O_EXCL: the loser of a race gets
        // AlreadyExists, never a partial write.
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(StevedoreError::NameTaken {
                    name: name.to_string(),
                    holder: idgen::truncate(holder.trim()).to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(id.as_bytes())?;
        tracing::debug!(name, id, "acquired container name");
        Ok(())
    }

    /// Releases `name` if it is held by `id`. Releasing a name that is
    /// missing or owned by another container is a no-op.
    pub fn release(&self, namespace: &str, name: &str, id: &str) -> Result<()> {
        let path = self.name_path(namespace, name)?;
        let holder = match fs::read_to_string(&path) {
            Ok(holder) => holder,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if holder.trim() != id {
            tracing::warn!(name, id, holder = holder.trim(), "not releasing name held by another container");
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Looks up the ID owning `name`, if any.
    pub fn resolve(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let path = self.name_path(namespace, name)?;
        match fs::read_to_string(&path) {
            Ok(id) => Ok(Some(id.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StevedoreError::InvalidInput(format!(
            "invalid container name \"{name}\": must match [a-zA-Z0-9][a-zA-Z0-9_.-]*"
        )))
    }
}

/// Suggests a name for a container created without `--name`: the last path
/// element of the image reference (minus tag or digest) plus the first
/// bytes of the ID. Pure function of its inputs; a fresh ID gives a fresh
/// suggestion on retry.
pub fn suggest(image_ref: &str, id: &str) -> String {
    let base = image_ref
        .rsplit('/')
        .next()
        .unwrap_or(image_ref)
        .split(['@', ':'])
        .next()
        .unwrap_or("container");
    let base = if base.is_empty() { "container" } else { base };
    format!("{}-{}", base, &id[..5.min(id.len())])
}
