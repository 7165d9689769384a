//! Container creation.
//!
//! `create_container` walks a fixed sequence of allocation steps. Every
//! step that leaves something behind pushes an undo closure onto a
//! rollback ledger; on failure the ledger runs in reverse so a failed
//! create leaves no trace. The ledger is disarmed once the container
//! record is committed, at which point the record owns all resources and
//! `rm` takes over cleanup duty.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;

use crate::container::{self, Container};
use crate::datastore::{DataStore, LOG_CONFIG};
use crate::error::{Result, StevedoreError};
use crate::idgen;
use crate::labels::ContainerLabels;
use crate::names::{self, NameStore};
use crate::network::{NetworkCoordinator, NetworkMode};
use crate::options::{ContainerOptions, ImageSource, Platform};
use crate::runtime::{ContainerRecord, ImageConfig, Services, TaskStatus};
use crate::spec::{self, mounts, SpecInput};
use crate::volume::{MountRequest, MountSource};

/// Undo closures for a partially completed create, run in reverse on
/// failure.
struct Rollback {
    steps: Vec<(&'static str, Box<dyn FnOnce() -> Result<()>>)>,
    armed: bool,
}

impl Rollback {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            armed: true,
        }
    }

    fn push(&mut self, step: &'static str, undo: impl FnOnce() -> Result<()> + 'static) {
        self.steps.push((step, Box::new(undo)));
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for (step, undo) in self.steps.drain(..).rev() {
            if let Err(err) = undo() {
                tracing::warn!(step, %err, "rollback step failed");
            }
        }
    }
}

pub fn create_container(
    services: &Services,
    store: &DataStore,
    names: &NameStore,
    namespace: &str,
    opts: &ContainerOptions,
) -> Result<Container> {
    opts.validate()?;
    if let Some(path) = &opts.cidfile {
        if path.exists() {
            return Err(StevedoreError::InvalidInput(format!(
                "container ID file found, make sure the other container isn't running \
                 or delete {}",
                path.display()
            )));
        }
    }

    let id = idgen::generate();
    let mut rollback = Rollback::new();

    let state_dir = store.allocate(namespace, &id)?;
    {
        let store = store.clone();
        let dir = state_dir.clone();
        rollback.push("state directory", move || store.destroy(&dir));
    }

    let name = match &opts.name {
        Some(name) => {
            names::validate_name(name)?;
            name.clone()
        }
        None => names::suggest(source_base(&opts.source), &id),
    };
    names.acquire(namespace, &name, &id)?;
    {
        let names = names.clone();
        let namespace = namespace.to_string();
        let name = name.clone();
        let id = id.clone();
        rollback.push("container name", move || {
            names.release(&namespace, &name, &id)
        });
    }

    let image = match &opts.source {
        ImageSource::Image(reference) => {
            let config = services.images.resolve(reference, opts.pull)?;
            services
                .images
                .prepare_snapshot(&opts.snapshotter, &id, reference)?;
            let images = services.images.clone();
            let snapshotter = opts.snapshotter.clone();
            let key = id.clone();
            rollback.push("snapshot", move || {
                images.remove_snapshot(&snapshotter, &key).map_err(Into::into)
            });
            config
        }
        ImageSource::Rootfs(_) => ImageConfig::default(),
    };

    let hostname = opts
        .hostname
        .clone()
        .unwrap_or_else(|| idgen::truncate(&id).to_string());

    let coordinator = NetworkCoordinator {
        networks: &*services.networks,
    };
    let use_hooks = !matches!(opts.platform, Platform::Windows);
    let mut plan = coordinator.plan(
        &opts.network,
        &state_dir,
        Some(&hostname),
        &opts.self_exe,
        &opts.global_args,
        use_hooks,
    )?;
    {
        let networks = services.networks.clone();
        let dir = state_dir.clone();
        rollback.push("network allocations", move || {
            NetworkCoordinator {
                networks: &*networks,
            }
            .teardown(&dir)
        });
    }
    if let NetworkMode::Container(target) = plan.mode().clone() {
        let (_, pid) = running_task(services, names, namespace, &target)?;
        plan.netns_path = Some(PathBuf::from(format!("/proc/{pid}/ns/net")));
    }

    let mut pid_container = None;
    let pidns_path = match opts.pid_namespace.as_deref() {
        Some(mode) if mode.starts_with("container:") => {
            let target = mode.trim_start_matches("container:");
            let (resolved, pid) = running_task(services, names, namespace, target)?;
            pid_container = Some(resolved.id().to_string());
            Some(PathBuf::from(format!("/proc/{pid}/ns/pid")))
        }
        _ => None,
    };

    let requests = mount_requests(opts, &image);
    let mut resolved = mounts::resolve(&requests, &*services.volumes)?;
    for reference in &opts.volumes_from {
        let donor = container::resolve(&*services.containers, names, namespace, reference)?;
        for point in &donor.labels.mount_points {
            resolved.mounts.push(mounts::mount_from_point(point)?);
            resolved.mount_points.push(point.clone());
        }
    }

    let log_uri = build_log_uri(opts, &state_dir)?;

    let container_labels = ContainerLabels {
        namespace: namespace.to_string(),
        name: Some(name),
        hostname: match plan.mode() {
            NetworkMode::Host => None,
            _ => Some(hostname),
        },
        extra_hosts: plan
            .extra_hosts
            .iter()
            .map(|(host, ip)| format!("{host}:{ip}"))
            .collect(),
        state_dir: Some(state_dir.clone()),
        networks: plan.mode().label_names(),
        ports: opts.network.ports.clone(),
        log_uri: log_uri.clone(),
        anonymous_volumes: resolved.anonymous.clone(),
        pid_file: opts.pidfile.clone(),
        ip_address: opts.network.ip.clone(),
        mount_points: resolved.mount_points.clone(),
        mac_address: opts.network.mac_address.clone(),
        pid_container,
        stop_signal: opts.stop_signal.clone().or_else(|| image.stop_signal.clone()),
        stop_timeout: opts.stop_timeout,
        platform: Some(opts.platform.as_str().to_string()),
        error: None,
    };

    // user labels first, so the internal keys always win
    let mut label_map = opts.labels.clone();
    label_map.extend(container_labels.to_map()?);
    label_map.extend(opts.restart.to_labels(log_uri.as_deref()));

    let oci_spec = spec::assemble(
        opts,
        SpecInput {
            id: &id,
            image: &image,
            plan: &plan,
            resolved_mounts: resolved.mounts,
            pidns_path,
            labels: &label_map,
        },
    )?;

    if let Some(path) = &opts.cidfile {
        fs::write(path, &id)?;
        let path = path.clone();
        rollback.push("container ID file", move || {
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        });
    }

    let record = ContainerRecord {
        id: id.clone(),
        namespace: namespace.to_string(),
        image: match &opts.source {
            ImageSource::Image(reference) => Some(reference.clone()),
            ImageSource::Rootfs(_) => None,
        },
        snapshotter: matches!(opts.source, ImageSource::Image(_))
            .then(|| opts.snapshotter.clone()),
        snapshot_key: matches!(opts.source, ImageSource::Image(_)).then(|| id.clone()),
        runtime: opts.runtime.clone(),
        labels: label_map,
        spec: oci_spec,
        created_at: Utc::now(),
    };
    services.containers.create(record.clone())?;

    rollback.disarm();
    tracing::info!(id = %idgen::truncate(&id), "created container");
    Container::from_record(record)
}

/// Records a post-create failure on the container so a later inspection
/// can tell why the record is doomed. Compare-and-set against the labels
/// read moments ago; a concurrent mutation wins and the error is dropped.
pub fn record_create_error(
    services: &Services,
    namespace: &str,
    id: &str,
    err: &StevedoreError,
) -> Result<()> {
    let record = services.containers.get(namespace, id)?;
    let updates = HashMap::from([(crate::labels::ERROR.to_string(), err.to_string())]);
    services
        .containers
        .update_labels(namespace, id, &record.labels, updates)?;
    Ok(())
}

/// The base string a generated name is derived from.
fn source_base(source: &ImageSource) -> &str {
    match source {
        ImageSource::Image(reference) => reference,
        ImageSource::Rootfs(path) => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("rootfs"),
    }
}

/// The user's mount requests plus an anonymous volume for every image
/// volume destination the user did not cover.
fn mount_requests(opts: &ContainerOptions, image: &ImageConfig) -> Vec<MountRequest> {
    let mut requests = opts.mounts.clone();
    for destination in &image.volumes {
        let destination = PathBuf::from(destination);
        if requests.iter().any(|r| r.destination == destination) {
            continue;
        }
        requests.push(MountRequest {
            source: MountSource::Anonymous,
            destination,
            options: Vec::new(),
        });
    }
    requests
}

/// Resolves a container reference whose task must be running, returning
/// it together with the task pid.
fn running_task(
    services: &Services,
    names: &NameStore,
    namespace: &str,
    reference: &str,
) -> Result<(Container, u32)> {
    let target = container::resolve(&*services.containers, names, namespace, reference)?;
    match services.tasks.status(namespace, target.id()) {
        Ok(TaskStatus::Running) => {
            let pid = services.tasks.pid(namespace, target.id())?;
            Ok((target, pid))
        }
        Ok(_) | Err(_) => Err(StevedoreError::InvalidInput(format!(
            "container {reference} is not running"
        ))),
    }
}

/// The log URI recorded on the task. A driver that is already a URI is
/// passed through; `none` disables logging; everything else becomes a
/// re-invocation of our own binary with the driver configuration written
/// to the state directory.
fn build_log_uri(opts: &ContainerOptions, state_dir: &std::path::Path) -> Result<Option<String>> {
    if opts.log_driver == "none" {
        return Ok(None);
    }
    if opts.log_driver.contains("://") {
        return Ok(Some(opts.log_driver.clone()));
    }

    let log_opts: HashMap<&str, &str> = opts
        .log_opts
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let config = serde_json::json!({
        "driver": opts.log_driver,
        "opts": log_opts,
    });
    fs::write(
        state_dir.join(LOG_CONFIG),
        serde_json::to_string_pretty(&config)?,
    )?;

    Ok(Some(format!(
        "binary://{}?driver={}&state-dir={}",
        opts.self_exe.display(),
        opts.log_driver,
        state_dir.display()
    )))
}
