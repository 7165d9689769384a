//! Container removal.
//!
//! Removal is a fixed sequence of teardown steps. Every step downgrades
//! "already gone" to success so a half-removed container can always be
//! removed again; the first real error is remembered and returned after
//! the remaining steps have run.

use std::time::Duration;

use crate::container::{self, Container};
use crate::datastore::DataStore;
use crate::error::{Result, StevedoreError};
use crate::idgen;
use crate::names::NameStore;
use crate::network::NetworkCoordinator;
use crate::runtime::{RuntimeError, Services, TaskStatus};

/// How long a force-removed task gets to die after SIGKILL.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Kill a running task instead of refusing.
    pub force: bool,
    /// Also remove the container's anonymous volumes.
    pub volumes: bool,
}

/// Removes the container identified by `needle` (name or ID prefix) and
/// returns its full ID.
pub fn remove_container(
    services: &Services,
    store: &DataStore,
    names: &NameStore,
    namespace: &str,
    needle: &str,
    opts: RemoveOptions,
) -> Result<String> {
    let container = container::resolve(&*services.containers, names, namespace, needle)?;
    let id = container.id().to_string();

    ensure_task_gone(services, namespace, &container, opts.force)?;

    let mut first_err: Option<StevedoreError> = None;
    let mut note = |step: &str, result: Result<()>| {
        if let Err(err) = result {
            if err.is_not_found() {
                return;
            }
            tracing::warn!(id = %idgen::truncate(&id), step, %err, "removal step failed");
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    };

    note(
        "container record",
        services
            .containers
            .delete(namespace, &id)
            .map_err(Into::into),
    );

    if let (Some(snapshotter), Some(key)) =
        (&container.record.snapshotter, &container.record.snapshot_key)
    {
        note(
            "snapshot",
            services
                .images
                .remove_snapshot(snapshotter, key)
                .map_err(Into::into),
        );
    }

    if let Some(name) = &container.labels.name {
        note("name", names.release(namespace, name, &id));
    }

    if let Some(state_dir) = &container.labels.state_dir {
        let coordinator = NetworkCoordinator {
            networks: &*services.networks,
        };
        note("network allocations", coordinator.teardown(state_dir));
        note("state directory", store.destroy(state_dir));
    }

    if opts.volumes {
        for volume in &container.labels.anonymous_volumes {
            note(
                "anonymous volume",
                services.volumes.remove(volume).map_err(Into::into),
            );
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(id),
    }
}

/// Deletes the container's task, killing it first under `--force`.
fn ensure_task_gone(
    services: &Services,
    namespace: &str,
    container: &Container,
    force: bool,
) -> Result<()> {
    let id = container.id();
    let status = match services.tasks.status(namespace, id) {
        Ok(status) => status,
        Err(RuntimeError::NotFound(_)) => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    match status {
        TaskStatus::Created | TaskStatus::Stopped | TaskStatus::Unknown => {}
        TaskStatus::Paused if !force => {
            return Err(StevedoreError::Conflict(format!(
                "you cannot remove a paused container {}, unpause the container or force remove",
                idgen::truncate(id)
            )));
        }
        TaskStatus::Running if !force => {
            return Err(StevedoreError::Conflict(format!(
                "You cannot remove a running container {}. \
                 Stop the container before attempting removal or force remove",
                idgen::truncate(id)
            )));
        }
        TaskStatus::Running | TaskStatus::Paused => {
            let exit = services.tasks.wait(namespace, id)?;
            match services.tasks.kill(namespace, id, libc::SIGKILL) {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
            if exit.recv_timeout(FORCE_KILL_WAIT).is_err() {
                return Err(StevedoreError::Conflict(format!(
                    "container {} did not exit after SIGKILL",
                    idgen::truncate(id)
                )));
            }
        }
    }

    match services.tasks.delete(namespace, id) {
        Ok(_) | Err(RuntimeError::NotFound(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
