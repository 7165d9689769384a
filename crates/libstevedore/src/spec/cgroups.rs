//! Resource limits: cgroup controllers, rlimits, devices and sysctls.

use std::collections::HashMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::PathBuf;

use oci_spec::runtime::{
    LinuxBlockIoBuilder, LinuxCpuBuilder, LinuxDeviceBuilder, LinuxDeviceCgroup,
    LinuxDeviceCgroupBuilder, LinuxDeviceType, LinuxIntelRdtBuilder, LinuxMemoryBuilder,
    LinuxPidsBuilder, LinuxResources, PosixRlimitBuilder, Spec,
};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

/// Period used when `--cpus` is translated into quota/period.
const DEFAULT_CPU_PERIOD: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub permissions: String,
}

/// Parses `--device src[:dst[:permissions]]`. Permissions are any
/// combination of `r`, `w` and `m`.
pub fn parse_device(flag: &str) -> Result<DeviceRequest> {
    let invalid = || StevedoreError::InvalidInput(format!("invalid device: {flag}"));
    let mut parts = flag.split(':');
    let host = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
    let (container, permissions) = match (parts.next(), parts.next()) {
        (None, _) => (host, "rwm"),
        (Some(second), None) if !second.starts_with('/') => (host, second),
        (Some(second), None) => (second, "rwm"),
        (Some(second), Some(third)) => (second, third),
    };
    if parts.next().is_some()
        || permissions.is_empty()
        || !permissions.chars().all(|c| matches!(c, 'r' | 'w' | 'm'))
    {
        return Err(invalid());
    }
    Ok(DeviceRequest {
        host_path: PathBuf::from(host),
        container_path: PathBuf::from(container),
        permissions: permissions.to_string(),
    })
}

fn device_entries(
    request: &DeviceRequest,
) -> Result<(oci_spec::runtime::LinuxDevice, LinuxDeviceCgroup)> {
    let meta = std::fs::metadata(&request.host_path).map_err(|err| {
        StevedoreError::InvalidInput(format!(
            "device {}: {err}",
            request.host_path.display()
        ))
    })?;
    let typ = if meta.file_type().is_block_device() {
        LinuxDeviceType::B
    } else if meta.file_type().is_char_device() {
        LinuxDeviceType::C
    } else {
        return Err(StevedoreError::InvalidInput(format!(
            "{} is not a device",
            request.host_path.display()
        )));
    };
    let major = libc::major(meta.rdev()) as i64;
    let minor = libc::minor(meta.rdev()) as i64;

    let device = LinuxDeviceBuilder::default()
        .path(request.container_path.clone())
        .typ(typ)
        .major(major)
        .minor(minor)
        .file_mode(meta.mode() & 0o777)
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    let cgroup = LinuxDeviceCgroupBuilder::default()
        .allow(true)
        .typ(typ)
        .major(major)
        .minor(minor)
        .access(request.permissions.clone())
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    Ok((device, cgroup))
}

fn build_err<E: std::fmt::Display>(err: E) -> StevedoreError {
    StevedoreError::InvalidInput(err.to_string())
}

pub fn configure(opts: &ContainerOptions, id: &str) -> Result<SpecMutator> {
    let res = opts.resources.clone();
    let sysctls = opts.sysctl.clone();
    let id = id.to_string();

    let devices = res
        .devices
        .iter()
        .map(|flag| parse_device(flag))
        .collect::<Result<Vec<_>>>()?;

    Ok(Box::new(move |spec: &mut Spec| {
        let mut linux = spec.linux().clone().unwrap_or_default();
        let mut resources = linux.resources().clone().unwrap_or_default();

        apply_cpu(&res, &mut resources)?;
        apply_memory(&res, &mut resources)?;
        if let Some(pids) = res.pids_limit {
            resources.set_pids(Some(
                LinuxPidsBuilder::default()
                    .limit(pids)
                    .build()
                    .map_err(build_err)?,
            ));
        }
        if let Some(weight) = res.blkio_weight {
            resources.set_block_io(Some(
                LinuxBlockIoBuilder::default()
                    .weight(weight)
                    .build()
                    .map_err(build_err)?,
            ));
        }
        if !res.cgroup_conf.is_empty() {
            let unified: HashMap<String, String> = res.cgroup_conf.iter().cloned().collect();
            resources.set_unified(Some(unified));
        }

        if !devices.is_empty() {
            let mut linux_devices = linux.devices().clone().unwrap_or_default();
            let mut allowed = resources.devices().clone().unwrap_or_default();
            for request in &devices {
                let (device, cgroup) = device_entries(request)?;
                linux_devices.push(device);
                allowed.push(cgroup);
            }
            linux.set_devices(Some(linux_devices));
            resources.set_devices(Some(allowed));
        }

        linux.set_resources(Some(resources));

        if !sysctls.is_empty() {
            let mut sysctl = linux.sysctl().clone().unwrap_or_default();
            sysctl.extend(sysctls.iter().cloned());
            linux.set_sysctl(Some(sysctl));
        }
        if let Some(parent) = &res.cgroup_parent {
            linux.set_cgroups_path(Some(PathBuf::from(format!("{parent}/{id}"))));
        }
        if let Some(class) = &res.rdt_class {
            linux.set_intel_rdt(Some(
                LinuxIntelRdtBuilder::default()
                    .clos_id(class.clone())
                    .build()
                    .map_err(build_err)?,
            ));
        }
        spec.set_linux(Some(linux));

        let mut process = spec.process().clone().unwrap_or_default();
        if !res.ulimits.is_empty() {
            let mut rlimits = process.rlimits().clone().unwrap_or_default();
            for ulimit in &res.ulimits {
                // the base spec ships stock rlimits; a user limit of the
                // same type replaces them
                rlimits.retain(|existing| existing.typ() != ulimit.name);
                rlimits.push(
                    PosixRlimitBuilder::default()
                        .typ(ulimit.name)
                        .soft(ulimit.soft)
                        .hard(ulimit.hard)
                        .build()
                        .map_err(build_err)?,
                );
            }
            process.set_rlimits(Some(rlimits));
        }
        if let Some(adj) = res.oom_score_adj {
            process.set_oom_score_adj(Some(adj));
        }
        spec.set_process(Some(process));

        Ok(())
    }))
}

fn apply_cpu(res: &crate::options::Resources, resources: &mut LinuxResources) -> Result<()> {
    if res.cpus.is_none()
        && res.cpu_shares.is_none()
        && res.cpu_quota.is_none()
        && res.cpu_period.is_none()
        && res.cpu_rt_runtime.is_none()
        && res.cpu_rt_period.is_none()
        && res.cpuset_cpus.is_none()
        && res.cpuset_mems.is_none()
    {
        return Ok(());
    }
    let mut builder = LinuxCpuBuilder::default();
    if let Some(cpus) = res.cpus {
        builder = builder
            .period(DEFAULT_CPU_PERIOD)
            .quota((cpus * DEFAULT_CPU_PERIOD as f64) as i64);
    }
    if let Some(shares) = res.cpu_shares {
        builder = builder.shares(shares);
    }
    if let Some(quota) = res.cpu_quota {
        builder = builder.quota(quota);
    }
    if let Some(period) = res.cpu_period {
        builder = builder.period(period);
    }
    if let Some(runtime) = res.cpu_rt_runtime {
        builder = builder.realtime_runtime(runtime);
    }
    if let Some(period) = res.cpu_rt_period {
        builder = builder.realtime_period(period);
    }
    if let Some(cpuset) = &res.cpuset_cpus {
        builder = builder.cpus(cpuset.clone());
    }
    if let Some(mems) = &res.cpuset_mems {
        builder = builder.mems(mems.clone());
    }
    let cpu = builder
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    resources.set_cpu(Some(cpu));
    Ok(())
}

fn apply_memory(res: &crate::options::Resources, resources: &mut LinuxResources) -> Result<()> {
    if res.memory.is_none()
        && res.memory_reservation.is_none()
        && res.memory_swap.is_none()
        && res.memory_swappiness.is_none()
        && !res.oom_kill_disable
    {
        return Ok(());
    }
    let mut builder = LinuxMemoryBuilder::default();
    if let Some(limit) = res.memory {
        builder = builder.limit(limit);
    }
    if let Some(reservation) = res.memory_reservation {
        builder = builder.reservation(reservation);
    }
    if let Some(swap) = res.memory_swap {
        builder = builder.swap(swap);
    }
    if let Some(swappiness) = res.memory_swappiness {
        builder = builder.swappiness(swappiness);
    }
    if res.oom_kill_disable {
        builder = builder.disable_oom_killer(true);
    }
    let memory = builder
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    resources.set_memory(Some(memory));
    Ok(())
}
