//! The orchestrator-side view of a container and reference resolution.

use crate::error::{Result, StevedoreError};
use crate::idgen;
use crate::labels::ContainerLabels;
use crate::names::NameStore;
use crate::runtime::{ContainerRecord, ContainerStore};

/// A container record with its internal labels decoded.
#[derive(Debug, Clone)]
pub struct Container {
    pub record: ContainerRecord,
    pub labels: ContainerLabels,
}

impl Container {
    pub fn from_record(record: ContainerRecord) -> Result<Self> {
        let labels = ContainerLabels::from_map(&record.labels)?;
        Ok(Self { record, labels })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn short_id(&self) -> &str {
        idgen::truncate(&self.record.id)
    }

    pub fn name(&self) -> Option<&str> {
        self.labels.name.as_deref()
    }
}

/// Resolves a user-supplied reference: an exact name first, then a unique
/// id prefix.
pub fn resolve(
    containers: &dyn ContainerStore,
    names: &NameStore,
    namespace: &str,
    needle: &str,
) -> Result<Container> {
    let id = match names.resolve(namespace, needle)? {
        Some(id) => id,
        None => {
            let candidates = containers.list(namespace)?;
            idgen::resolve_prefix(candidates.into_iter(), needle).map_err(|err| {
                if err.is_not_found() {
                    StevedoreError::NotFound(format!("no such container: {needle}"))
                } else {
                    err
                }
            })?
        }
    };
    let record = containers.get(namespace, &id)?;
    Container::from_record(record)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use oci_spec::runtime::Spec;

    use super::*;
    use crate::datastore::DataStore;
    use crate::labels;
    use crate::runtime::memory::MemoryRuntime;

    fn record(id: &str, name: Option<&str>) -> ContainerRecord {
        let mut labels = HashMap::from([(
            labels::NAMESPACE.to_string(),
            "default".to_string(),
        )]);
        if let Some(name) = name {
            labels.insert(labels::NAME.to_string(), name.to_string());
        }
        ContainerRecord {
            id: id.to_string(),
            namespace: "default".to_string(),
            image: Some("alpine".to_string()),
            snapshotter: None,
            snapshot_key: None,
            runtime: "io.containerd.runc.v2".to_string(),
            labels,
            spec: Spec::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_by_name_and_prefix() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = DataStore::open(tmp.path())?;
        let names = NameStore::new(&store);
        let runtime = MemoryRuntime::new();

        let id = format!("aa{}", "0".repeat(62));
        ContainerStore::create(&runtime, record(&id, Some("web")))?;
        names.acquire("default", "web", &id)?;

        let by_name = resolve(&runtime, &names, "default", "web")?;
        assert_eq!(by_name.id(), id);
        assert_eq!(by_name.name(), Some("web"));

        let by_prefix = resolve(&runtime, &names, "default", "aa")?;
        assert_eq!(by_prefix.id(), id);
        assert_eq!(by_prefix.short_id().len(), 12);
        Ok(())
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = DataStore::open(tmp.path())?;
        let names = NameStore::new(&store);
        let runtime = MemoryRuntime::new();

        ContainerStore::create(&runtime, record(&format!("ab{}", "0".repeat(62)), None))?;
        ContainerStore::create(&runtime, record(&format!("ac{}", "1".repeat(62)), None))?;

        let err = resolve(&runtime, &names, "default", "a").unwrap_err();
        assert!(matches!(err, StevedoreError::AmbiguousId(_)));

        let err = resolve(&runtime, &names, "default", "zz").unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }
}
