//! Per-invocation wiring: the data store, the name registry and the
//! runtime service connection.

use anyhow::{bail, Context as _, Result};
use libdocker_cli::GlobalOpts;
use libstevedore::datastore::DataStore;
use libstevedore::names::NameStore;
use libstevedore::runtime::memory::MemoryRuntime;
use libstevedore::runtime::Services;

/// Everything a command needs, opened once per invocation.
pub struct Context {
    pub services: Services,
    pub store: DataStore,
    pub names: NameStore,
    pub namespace: String,
    pub global_args: Vec<String>,
}

impl Context {
    pub fn open(global: &GlobalOpts) -> Result<Self> {
        let store = DataStore::open(&global.data_root).with_context(|| {
            format!("failed to open data root {}", global.data_root.display())
        })?;
        let names = NameStore::new(&store);
        let services = connect(global)?;
        Ok(Self {
            services,
            store,
            names,
            namespace: global.namespace.clone(),
            global_args: global_args(global),
        })
    }
}

/// Opens the runtime service named by `--address`. Only the in-process
/// `memory://` engine is wired up here; the containerd gRPC transport is
/// a separate build.
fn connect(global: &GlobalOpts) -> Result<Services> {
    match global.address.to_str() {
        Some(addr) if addr.starts_with("memory://") => Ok(MemoryRuntime::new().services()),
        _ => bail!(
            "cannot connect to the runtime service at {}: this build only supports \
             the in-process engine, pass --address memory://",
            global.address.display()
        ),
    }
}

/// The global flags re-issued to our own binary from OCI hooks and the
/// logging URI. Flags with default values are spelled out so the hook
/// invocation does not depend on the environment it runs in.
fn global_args(global: &GlobalOpts) -> Vec<String> {
    let mut args = vec![
        "--data-root".to_string(),
        global.data_root.display().to_string(),
        "--namespace".to_string(),
        global.namespace.clone(),
        "--address".to_string(),
        global.address.display().to_string(),
    ];
    if global.debug {
        args.push("--debug".to_string());
    }
    if let Some(level) = &global.log_level {
        args.push("--log-level".to_string());
        args.push(level.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn global(address: &str, data_root: PathBuf) -> GlobalOpts {
        GlobalOpts {
            data_root,
            namespace: "default".to_string(),
            address: PathBuf::from(address),
            debug: false,
            log_level: None,
            log_format: None,
            log: None,
        }
    }

    #[test]
    fn test_memory_address_connects() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = Context::open(&global("memory://", tmp.path().to_path_buf())).unwrap();
        assert_eq!(ctx.namespace, "default");
        assert!(ctx.services.networks.list().unwrap().is_empty());
    }

    #[test]
    fn test_containerd_socket_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Context::open(&global(
            "/run/containerd/containerd.sock",
            tmp.path().to_path_buf(),
        ))
        .err()
        .unwrap();
        assert!(err.to_string().contains("memory://"));
    }

    #[test]
    fn test_global_args_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut g = global("memory://", tmp.path().to_path_buf());
        g.debug = true;
        let args = global_args(&g);
        assert!(args.contains(&"--debug".to_string()));
        let ns_idx = args.iter().position(|a| a == "--namespace").unwrap();
        assert_eq!(args[ns_idx + 1], "default");
    }
}
