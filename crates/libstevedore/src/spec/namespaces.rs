//! Namespace layout: network mode, `--pid`, `--ipc`, `--uts` and
//! `--cgroupns`.

use std::path::PathBuf;

use oci_spec::runtime::{
    LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType, MountBuilder, Spec,
};

use crate::error::{Result, StevedoreError};
use crate::network::{NetworkMode, NetworkPlan};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

fn remove(namespaces: &mut Vec<LinuxNamespace>, typ: LinuxNamespaceType) {
    namespaces.retain(|ns| ns.typ() != typ);
}

fn join(
    namespaces: &mut Vec<LinuxNamespace>,
    typ: LinuxNamespaceType,
    path: PathBuf,
) -> Result<()> {
    remove(namespaces, typ);
    let ns = LinuxNamespaceBuilder::default()
        .typ(typ)
        .path(path)
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    namespaces.push(ns);
    Ok(())
}

/// `--pid host` without privileges: the kernel refuses a fresh procfs
/// mount over a pid namespace the caller does not own, so the host's
/// /proc is rbind-mounted instead and the proc path protections that
/// assume a private instance are dropped.
fn rewrite_proc_for_host_pidns(spec: &mut Spec) -> Result<()> {
    let mut mounts = spec.mounts().clone().unwrap_or_default();
    mounts.retain(|m| m.destination() != std::path::Path::new("/proc"));
    let mount = MountBuilder::default()
        .destination("/proc")
        .typ("bind")
        .source("/proc")
        .options(vec![
            "rbind".to_string(),
            "nosuid".to_string(),
            "noexec".to_string(),
            "nodev".to_string(),
        ])
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    mounts.push(mount);
    spec.set_mounts(Some(mounts));

    let mut linux = spec.linux().clone().unwrap_or_default();
    if let Some(paths) = linux.readonly_paths().clone() {
        linux.set_readonly_paths(Some(
            paths.into_iter().filter(|p| !p.starts_with("/proc")).collect(),
        ));
    }
    if let Some(paths) = linux.masked_paths().clone() {
        linux.set_masked_paths(Some(
            paths.into_iter().filter(|p| !p.starts_with("/proc")).collect(),
        ));
    }
    spec.set_linux(Some(linux));
    Ok(())
}

pub fn configure(
    opts: &ContainerOptions,
    plan: &NetworkPlan,
    pidns_path: Option<PathBuf>,
) -> Result<SpecMutator> {
    let network_mode = plan.mode().clone();
    let rootless = nix::unistd::geteuid().as_raw() != 0;
    let netns_path = plan.netns_path.clone();
    let pid_mode = opts.pid_namespace.clone();
    let ipc_mode = opts.ipc_namespace.clone();
    let uts_mode = opts.uts_namespace.clone();
    let cgroupns = opts.resources.cgroupns.clone();

    if let Some(mode) = &pid_mode {
        if mode != "host" && !mode.starts_with("container:") {
            return Err(StevedoreError::InvalidInput(format!(
                "invalid pid namespace: {mode}"
            )));
        }
        if mode.starts_with("container:") && pidns_path.is_none() {
            return Err(StevedoreError::InvalidInput(
                "pid container target has no running task".to_string(),
            ));
        }
    }
    if let Some(mode) = &ipc_mode {
        if mode != "host" && mode != "private" {
            return Err(StevedoreError::InvalidInput(format!(
                "invalid ipc namespace: {mode}"
            )));
        }
    }
    if let Some(mode) = &uts_mode {
        if mode != "host" {
            return Err(StevedoreError::InvalidInput(format!(
                "invalid uts namespace: {mode}"
            )));
        }
    }
    if let Some(mode) = &cgroupns {
        if mode != "host" && mode != "private" {
            return Err(StevedoreError::InvalidInput(format!(
                "invalid cgroup namespace: {mode}"
            )));
        }
    }

    Ok(Box::new(move |spec: &mut Spec| {
        let mut linux = spec.linux().clone().unwrap_or_default();
        let mut namespaces = linux.namespaces().clone().unwrap_or_default();

        match &network_mode {
            NetworkMode::Host => remove(&mut namespaces, LinuxNamespaceType::Network),
            NetworkMode::Container(_) => {
                if let Some(path) = netns_path {
                    join(&mut namespaces, LinuxNamespaceType::Network, path)?;
                }
            }
            NetworkMode::None | NetworkMode::Cni(_) => {
                // private netns; the hook populates it for CNI networks
            }
        }

        match pid_mode.as_deref() {
            Some("host") => remove(&mut namespaces, LinuxNamespaceType::Pid),
            Some(_) => {
                if let Some(path) = pidns_path {
                    join(&mut namespaces, LinuxNamespaceType::Pid, path)?;
                }
            }
            None => {}
        }

        let mut host_ipc_binds = false;
        if ipc_mode.as_deref() == Some("host") {
            remove(&mut namespaces, LinuxNamespaceType::Ipc);
            host_ipc_binds = true;
        }
        if uts_mode.as_deref() == Some("host") {
            remove(&mut namespaces, LinuxNamespaceType::Uts);
        }
        if cgroupns.as_deref() == Some("host") {
            remove(&mut namespaces, LinuxNamespaceType::Cgroup);
        }

        linux.set_namespaces(Some(namespaces));
        spec.set_linux(Some(linux));

        if host_ipc_binds {
            // share the host's SysV and POSIX message queue objects
            let mut mounts = spec.mounts().clone().unwrap_or_default();
            for path in ["/dev/shm", "/dev/mqueue"] {
                mounts.retain(|m| m.destination() != std::path::Path::new(path));
                let mount = MountBuilder::default()
                    .destination(path)
                    .typ("bind")
                    .source(path)
                    .options(vec!["rbind".to_string(), "rw".to_string()])
                    .build()
                    .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
                mounts.push(mount);
            }
            spec.set_mounts(Some(mounts));
        }

        if pid_mode.as_deref() == Some("host") && rootless {
            rewrite_proc_for_host_pidns(spec)?;
        }

        Ok(())
    }))
}
