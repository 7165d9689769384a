//! Mount resolution and the mount table of the assembled spec.
//!
//! Volume-backed requests are resolved against the volume catalog before
//! assembly; the mutator then merges the platform default mounts, the
//! per-container /etc binds and the resolved mounts, with later entries
//! winning on destination collisions.

use std::path::Path;

use oci_spec::runtime::{Mount, MountBuilder, Spec};

use crate::error::{Result, StevedoreError};
use crate::network::NetworkPlan;
use crate::options::ContainerOptions;
use crate::runtime::VolumeStore;
use crate::spec::SpecMutator;
use crate::volume::{self, MountPoint, MountRequest, MountSource};

/// Outcome of resolving the user's mount requests.
#[derive(Debug, Default)]
pub struct ResolvedVolumes {
    pub mounts: Vec<Mount>,
    pub mount_points: Vec<MountPoint>,
    /// Names of volumes created implicitly for this container.
    pub anonymous: Vec<String>,
}

fn build_mount(
    destination: &Path,
    typ: &str,
    source: Option<&Path>,
    options: Vec<String>,
) -> Result<Mount> {
    let mut builder = MountBuilder::default()
        .destination(destination)
        .typ(typ)
        .options(options);
    if let Some(source) = source {
        builder = builder.source(source);
    }
    builder
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))
}

fn bind_options(request: &MountRequest) -> Vec<String> {
    let mut options = vec!["rbind".to_string()];
    for opt in &request.options {
        match opt.as_str() {
            "ro" | "rw" => options.push(opt.clone()),
            "shared" | "rshared" | "slave" | "rslave" | "private" | "rprivate" => {
                options.push(opt.clone())
            }
            _ => {}
        }
    }
    if !options.iter().any(|o| o == "ro" || o == "rw") {
        options.push("rw".to_string());
    }
    if !options.iter().any(|o| o.ends_with("shared") || o.ends_with("slave") || o.ends_with("private")) {
        options.push("rprivate".to_string());
    }
    options
}

/// Resolves mount requests against the volume catalog. Named volumes are
/// created on first use; anonymous volumes get generated names that the
/// caller records in the anonymous-volume set.
pub fn resolve(
    requests: &[MountRequest],
    volumes: &dyn VolumeStore,
) -> Result<ResolvedVolumes> {
    let mut resolved = ResolvedVolumes::default();

    for request in requests {
        let read_only = request.read_only();
        match &request.source {
            MountSource::Volume(_) | MountSource::Anonymous => {
                let name = match &request.source {
                    MountSource::Volume(name) => name.clone(),
                    _ => {
                        let generated = volume::anonymous_volume_name();
                        resolved.anonymous.push(generated.clone());
                        generated
                    }
                };
                let info = volumes.create(&name)?;
                let options = bind_options(request);
                resolved.mounts.push(build_mount(
                    &request.destination,
                    "bind",
                    Some(&info.mountpoint),
                    options.clone(),
                )?);
                resolved.mount_points.push(MountPoint {
                    kind: "volume".to_string(),
                    name: Some(name),
                    source: info.mountpoint.display().to_string(),
                    destination: request.destination.display().to_string(),
                    mode: request.options.join(","),
                    rw: !read_only,
                    propagation: String::new(),
                });
            }
            MountSource::Bind(host_path) => {
                let options = bind_options(request);
                resolved.mounts.push(build_mount(
                    &request.destination,
                    "bind",
                    Some(host_path),
                    options,
                )?);
                resolved.mount_points.push(MountPoint {
                    kind: "bind".to_string(),
                    name: None,
                    source: host_path.display().to_string(),
                    destination: request.destination.display().to_string(),
                    mode: request.options.join(","),
                    rw: !read_only,
                    propagation: "rprivate".to_string(),
                });
            }
            MountSource::Tmpfs => {
                let mut options = vec!["noexec".to_string(), "nosuid".to_string(), "nodev".to_string()];
                options.extend(request.options.iter().cloned());
                resolved.mounts.push(build_mount(
                    &request.destination,
                    "tmpfs",
                    Some(Path::new("tmpfs")),
                    options,
                )?);
                resolved.mount_points.push(MountPoint {
                    kind: "tmpfs".to_string(),
                    name: None,
                    source: "tmpfs".to_string(),
                    destination: request.destination.display().to_string(),
                    mode: request.options.join(","),
                    rw: !read_only,
                    propagation: String::new(),
                });
            }
        }
    }

    Ok(resolved)
}

/// Rebuilds an OCI mount from a persisted mount point, used by
/// `--volumes-from`.
pub fn mount_from_point(point: &MountPoint) -> Result<Mount> {
    let mut options = vec!["rbind".to_string()];
    options.push(if point.rw { "rw" } else { "ro" }.to_string());
    let typ = if point.kind == "tmpfs" { "tmpfs" } else { "bind" };
    build_mount(
        Path::new(&point.destination),
        typ,
        Some(Path::new(&point.source)),
        options,
    )
}

pub fn configure(
    opts: &ContainerOptions,
    plan: &NetworkPlan,
    resolved_mounts: Vec<Mount>,
) -> Result<SpecMutator> {
    let mut extra = Vec::new();

    let etc_bind = |dest: &str, source: &Path| {
        build_mount(
            Path::new(dest),
            "bind",
            Some(source),
            vec!["bind".to_string(), "rprivate".to_string(), "rw".to_string()],
        )
    };
    if let Some(resolv) = &plan.resolv_conf {
        extra.push(etc_bind("/etc/resolv.conf", resolv)?);
    }
    if let Some(hosts) = &plan.hosts {
        extra.push(etc_bind("/etc/hosts", hosts)?);
    }

    let shm_size = opts.shm_size;
    extra.extend(resolved_mounts);

    Ok(Box::new(move |spec: &mut Spec| {
        let mut mounts = spec.mounts().clone().unwrap_or_default();

        if let Some(size) = shm_size {
            for mount in mounts.iter_mut() {
                if mount.destination() == Path::new("/dev/shm") {
                    let mut options: Vec<String> = mount
                        .options()
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|o| !o.starts_with("size="))
                        .collect();
                    options.push(format!("size={size}"));
                    mount.set_options(Some(options));
                }
            }
        }

        // later mounts shadow earlier ones on the same destination
        for mount in extra {
            mounts.retain(|m| m.destination() != mount.destination());
            mounts.push(mount);
        }

        spec.set_mounts(Some(mounts));
        Ok(())
    }))
}
