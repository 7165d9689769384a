//! Task lifecycle driving: start, foreground wait, stop with SIGKILL
//! escalation, kill and restart.
//!
//! The exit channel is always subscribed before the task is started, so
//! the exit of a short-lived command can never slip past the waiter.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use nix::sys::signal::Signal;

use crate::container::Container;
use crate::error::{Result, StevedoreError};
use crate::labels::ContainerLabels;
use crate::runtime::{ExitStatus, RuntimeError, Services, TaskIo, TaskStatus};
use crate::signal;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for the task to disappear after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Creates and starts the container's task. The returned receiver yields
/// the task's exit status exactly once.
pub fn start_task(
    services: &Services,
    namespace: &str,
    id: &str,
    io: TaskIo,
) -> Result<Receiver<ExitStatus>> {
    services.tasks.create(namespace, id, io)?;
    let exit = services.tasks.wait(namespace, id)?;
    services.tasks.start(namespace, id)?;
    Ok(exit)
}

/// Blocks until the task exits or the attach detaches. `None` means the
/// user detached; the task keeps running.
pub fn wait_foreground(
    exit: &Receiver<ExitStatus>,
    detach: Option<&Receiver<()>>,
) -> Result<Option<ExitStatus>> {
    match detach {
        None => exit.recv().map(Some).map_err(|_| {
            StevedoreError::Conflict("task exited without reporting a status".to_string())
        }),
        Some(detach) => {
            crossbeam_channel::select! {
                recv(exit) -> status => status.map(Some).map_err(|_| {
                    StevedoreError::Conflict(
                        "task exited without reporting a status".to_string(),
                    )
                }),
                recv(detach) -> _ => Ok(None),
            }
        }
    }
}

/// Sends a named signal to the running task.
pub fn kill_task(services: &Services, namespace: &str, id: &str, signal_name: &str) -> Result<()> {
    let sig = signal::parse(signal_name)
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    services.tasks.kill(namespace, id, sig as i32)?;
    Ok(())
}

/// Stops the task: stop signal first, SIGKILL after the timeout. Returns
/// the exit status, or `None` when there was nothing left to stop.
pub fn stop_task(
    services: &Services,
    namespace: &str,
    id: &str,
    labels: &ContainerLabels,
    timeout_override: Option<u32>,
) -> Result<Option<ExitStatus>> {
    match services.tasks.status(namespace, id) {
        Ok(TaskStatus::Stopped) => return Ok(None),
        Err(RuntimeError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
        Ok(_) => {}
    }

    let stop_signal = labels.stop_signal.as_deref().unwrap_or("SIGTERM");
    let sig = signal::parse(stop_signal)
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
    let timeout = timeout_override
        .or(labels.stop_timeout)
        .map(|t| Duration::from_secs(t.into()))
        .unwrap_or(DEFAULT_STOP_TIMEOUT);

    let exit = services.tasks.wait(namespace, id)?;
    match services.tasks.kill(namespace, id, sig as i32) {
        Ok(()) => {}
        Err(RuntimeError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    match exit.recv_timeout(timeout) {
        Ok(status) => Ok(Some(status)),
        Err(RecvTimeoutError::Disconnected) => Ok(None),
        Err(RecvTimeoutError::Timeout) => {
            tracing::debug!(id, "stop timeout expired, escalating to SIGKILL");
            match services.tasks.kill(namespace, id, Signal::SIGKILL as i32) {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
            match exit.recv_timeout(KILL_WAIT) {
                Ok(status) => Ok(Some(status)),
                Err(_) => Err(StevedoreError::Conflict(format!(
                    "container {id} did not exit after SIGKILL"
                ))),
            }
        }
    }
}

/// Stops the task (if any) and starts a fresh one for the same container,
/// keeping the container ID and logging configuration.
pub fn restart_task(
    services: &Services,
    container: &Container,
    timeout_override: Option<u32>,
) -> Result<()> {
    let namespace = &container.record.namespace;
    let id = container.id();

    let task_exists = match services.tasks.status(namespace, id) {
        Ok(_) => true,
        Err(RuntimeError::NotFound(_)) => false,
        Err(err) => return Err(err.into()),
    };
    if task_exists {
        stop_task(services, namespace, id, &container.labels, timeout_override)?;
        match services.tasks.delete(namespace, id) {
            Ok(_) | Err(RuntimeError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let io = TaskIo {
        tty: false,
        stdin: false,
        log_uri: container.labels.log_uri.clone(),
        stdout: None,
        stderr: None,
    };
    services.tasks.create(namespace, id, io)?;
    services.tasks.start(namespace, id)?;
    Ok(())
}

/// Whether a caught signal is forwarded to a foreground task. SIGURG is
/// used by runtimes for scheduling and would be pure noise; SIGKILL and
/// SIGSTOP cannot be caught in the first place.
pub fn forwardable(sig: Signal) -> bool {
    !matches!(
        sig,
        Signal::SIGURG | Signal::SIGKILL | Signal::SIGSTOP | Signal::SIGCHLD | Signal::SIGWINCH
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use oci_spec::runtime::Spec;

    use super::*;
    use crate::container::Container;
    use crate::runtime::memory::{MemoryRuntime, SharedBuffer};
    use crate::runtime::{ContainerRecord, ContainerStore};

    fn record(runtime: &MemoryRuntime, id: &str, args: &[&str]) -> ContainerRecord {
        let mut spec = Spec::default();
        let mut process = spec.process().clone().unwrap_or_default();
        process.set_args(Some(args.iter().map(|a| a.to_string()).collect()));
        spec.set_process(Some(process));
        let rec = ContainerRecord {
            id: id.to_string(),
            namespace: "default".to_string(),
            image: Some("alpine".to_string()),
            snapshotter: None,
            snapshot_key: None,
            runtime: "io.containerd.runc.v2".to_string(),
            labels: HashMap::new(),
            spec,
            created_at: Utc::now(),
        };
        ContainerStore::create(runtime, rec.clone()).unwrap();
        rec
    }

    fn container(rec: ContainerRecord) -> Container {
        Container::from_record(rec).unwrap()
    }

    #[test]
    fn test_start_task_captures_short_lived_exit() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "echo1", &["echo", "hello"]);

        let buffer = SharedBuffer::new();
        let io = TaskIo {
            stdout: Some(Box::new(buffer.clone())),
            ..Default::default()
        };
        let exit = start_task(&services, "default", &rec.id, io).unwrap();
        let status = exit.recv().unwrap();
        assert_eq!(status.code, 0);
        assert_eq!(buffer.contents(), "hello\n");
    }

    #[test]
    fn test_stop_task_with_escalation() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "stuck", &["sleep", "infinity"]);
        runtime.ignore_signal("default", "stuck", libc::SIGTERM);

        start_task(&services, "default", &rec.id, TaskIo::default()).unwrap();

        let labels = ContainerLabels::default();
        let status = stop_task(&services, "default", &rec.id, &labels, Some(0))
            .unwrap()
            .unwrap();
        assert_eq!(status.code, 137);
    }

    #[test]
    fn test_stop_task_honors_stop_signal() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "srv", &["sleep", "infinity"]);

        start_task(&services, "default", &rec.id, TaskIo::default()).unwrap();

        let labels = ContainerLabels {
            stop_signal: Some("SIGINT".to_string()),
            ..Default::default()
        };
        let status = stop_task(&services, "default", &rec.id, &labels, None)
            .unwrap()
            .unwrap();
        assert_eq!(status.code, 128 + libc::SIGINT);
    }

    #[test]
    fn test_stop_task_on_stopped_is_noop() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "done", &["true"]);
        let exit = start_task(&services, "default", &rec.id, TaskIo::default()).unwrap();
        exit.recv().unwrap();

        let labels = ContainerLabels::default();
        assert!(stop_task(&services, "default", &rec.id, &labels, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_restart_task_replaces_running_task() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "web", &["sleep", "infinity"]);
        start_task(&services, "default", &rec.id, TaskIo::default()).unwrap();
        let first_pid = services.tasks.pid("default", &rec.id).unwrap();

        restart_task(&services, &container(rec.clone()), Some(0)).unwrap();

        assert_eq!(
            services.tasks.status("default", &rec.id).unwrap(),
            TaskStatus::Running
        );
        assert_ne!(services.tasks.pid("default", &rec.id).unwrap(), first_pid);
    }

    #[test]
    fn test_restart_task_starts_stopped_container() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "idle", &["sleep", "infinity"]);

        restart_task(&services, &container(rec.clone()), None).unwrap();
        assert_eq!(
            services.tasks.status("default", &rec.id).unwrap(),
            TaskStatus::Running
        );
    }

    #[test]
    fn test_kill_task_rejects_bad_signal() {
        let runtime = MemoryRuntime::new();
        let services = runtime.services();
        let rec = record(&runtime, "sig", &["sleep", "infinity"]);
        start_task(&services, "default", &rec.id, TaskIo::default()).unwrap();

        assert!(kill_task(&services, "default", &rec.id, "NOSUCHSIG").is_err());
        kill_task(&services, "default", &rec.id, "KILL").unwrap();
        assert_eq!(
            services.tasks.status("default", &rec.id).unwrap(),
            TaskStatus::Stopped
        );
    }

    #[test]
    fn test_forwardable() {
        assert!(forwardable(Signal::SIGTERM));
        assert!(forwardable(Signal::SIGINT));
        assert!(!forwardable(Signal::SIGURG));
        assert!(!forwardable(Signal::SIGKILL));
        assert!(!forwardable(Signal::SIGWINCH));
    }
}
