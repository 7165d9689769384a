//! A complete in-process implementation of the runtime seams.
//!
//! Tasks are simulated state machines: a handful of well-known commands
//! (`echo`, `true`, `false`) complete immediately, everything else keeps
//! running until it is signalled or finished from the outside. The test
//! suite and the hermetic `memory://` backend are built on this engine.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use crossbeam_channel::{unbounded, Sender};

use super::{
    ContainerRecord, ContainerStore, ExitStatus, ImageConfig, ImageStore, NetworkStore,
    PullPolicy, RuntimeError, Services, TaskIo, TaskService, TaskStatus, VolumeInfo, VolumeStore,
};

#[derive(Clone, Default)]
pub struct MemoryRuntime {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    containers: Mutex<HashMap<String, ContainerRecord>>,
    tasks: Mutex<HashMap<String, MemTask>>,
    images: Mutex<HashMap<String, ImageConfig>>,
    snapshots: Mutex<HashSet<String>>,
    volumes: Mutex<HashMap<String, VolumeInfo>>,
    networks: Mutex<HashSet<String>>,
    pending_ignores: Mutex<HashMap<String, HashSet<i32>>>,
    next_pid: AtomicU32,
}

struct MemTask {
    status: TaskStatus,
    pid: u32,
    io: TaskIo,
    waiters: Vec<Sender<ExitStatus>>,
    exit: Option<ExitStatus>,
    ignored_signals: HashSet<i32>,
}

fn key(namespace: &str, id: &str) -> String {
    format!("{namespace}/{id}")
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> Services {
        Services {
            containers: Arc::new(self.clone()),
            tasks: Arc::new(self.clone()),
            images: Arc::new(self.clone()),
            volumes: Arc::new(self.clone()),
            networks: Arc::new(self.clone()),
        }
    }

    pub fn add_image(&self, reference: &str, config: ImageConfig) {
        self.inner
            .images
            .lock()
            .unwrap()
            .insert(reference.to_string(), config);
    }

    pub fn add_network(&self, name: &str) {
        self.inner.networks.lock().unwrap().insert(name.to_string());
    }

    /// Makes the task ignore a signal, so stop escalation paths can be
    /// exercised. SIGKILL can not be ignored. Calls before the task
    /// exists are staged and applied when it is created.
    pub fn ignore_signal(&self, namespace: &str, id: &str, signal: i32) {
        let k = key(namespace, id);
        if let Some(task) = self.inner.tasks.lock().unwrap().get_mut(&k) {
            task.ignored_signals.insert(signal);
            return;
        }
        self.inner
            .pending_ignores
            .lock()
            .unwrap()
            .entry(k)
            .or_default()
            .insert(signal);
    }

    /// Completes a running task from the outside with the given code.
    pub fn finish_task(&self, namespace: &str, id: &str, code: i32) {
        let mut tasks = self.inner.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&key(namespace, id)) {
            task.finish(code);
        }
    }

    /// Marks a running task as paused, as `pause` would.
    pub fn pause_task(&self, namespace: &str, id: &str) {
        if let Some(task) = self.inner.tasks.lock().unwrap().get_mut(&key(namespace, id)) {
            task.status = TaskStatus::Paused;
        }
    }

    pub fn has_snapshot(&self, snapshotter: &str, snapshot_key: &str) -> bool {
        self.inner
            .snapshots
            .lock()
            .unwrap()
            .contains(&format!("{snapshotter}/{snapshot_key}"))
    }

    pub fn task_exists(&self, namespace: &str, id: &str) -> bool {
        self.inner.tasks.lock().unwrap().contains_key(&key(namespace, id))
    }
}

impl MemTask {
    fn finish(&mut self, code: i32) {
        if self.exit.is_some() {
            return;
        }
        self.status = TaskStatus::Stopped;
        let exit = ExitStatus { code };
        self.exit = Some(exit);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(exit);
        }
    }
}

/// The simulated process: a few well-known commands complete on their own.
fn simulate(args: &[String], io: &mut TaskIo) -> Option<i32> {
    let mut args = args;
    // skip an injected init prefix such as ["/sbin/tini", "--"]
    if args.len() >= 2 && args[0].starts_with("/sbin/") && args[1] == "--" {
        args = &args[2..];
    }
    let program = args.first()?.rsplit('/').next()?;
    match program {
        "echo" => {
            if let Some(stdout) = io.stdout.as_mut() {
                let mut line = args[1..].join(" ");
                line.push('\n');
                let _ = stdout.write_all(line.as_bytes());
            }
            Some(0)
        }
        "true" => Some(0),
        "false" => Some(1),
        _ => None,
    }
}

impl ContainerStore for MemoryRuntime {
    fn create(&self, record: ContainerRecord) -> Result<(), RuntimeError> {
        let mut containers = self.inner.containers.lock().unwrap();
        let k = key(&record.namespace, &record.id);
        if containers.contains_key(&k) {
            return Err(RuntimeError::AlreadyExists(record.id));
        }
        containers.insert(k, record);
        Ok(())
    }

    fn get(&self, namespace: &str, id: &str) -> Result<ContainerRecord, RuntimeError> {
        self.inner
            .containers
            .lock()
            .unwrap()
            .get(&key(namespace, id))
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, RuntimeError> {
        let prefix = format!("{namespace}/");
        let mut ids: Vec<String> = self
            .inner
            .containers
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn update_labels(
        &self,
        namespace: &str,
        id: &str,
        expected: &HashMap<String, String>,
        updates: HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut containers = self.inner.containers.lock().unwrap();
        let record = containers
            .get_mut(&key(namespace, id))
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
        if &record.labels != expected {
            return Err(RuntimeError::LabelConflict(id.to_string()));
        }
        record.labels.extend(updates);
        Ok(())
    }

    fn delete(&self, namespace: &str, id: &str) -> Result<(), RuntimeError> {
        let k = key(namespace, id);
        if let Some(task) = self.inner.tasks.lock().unwrap().get(&k) {
            if task.status == TaskStatus::Running {
                return Err(RuntimeError::FailedPrecondition(format!(
                    "container {id} has a running task"
                )));
            }
        }
        self.inner
            .containers
            .lock()
            .unwrap()
            .remove(&k)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))
    }
}

impl TaskService for MemoryRuntime {
    fn create(&self, namespace: &str, id: &str, io: TaskIo) -> Result<(), RuntimeError> {
        let k = key(namespace, id);
        if !self.inner.containers.lock().unwrap().contains_key(&k) {
            return Err(RuntimeError::NotFound(format!("container {id}")));
        }
        let mut tasks = self.inner.tasks.lock().unwrap();
        if tasks.contains_key(&k) {
            return Err(RuntimeError::AlreadyExists(format!("task {id}")));
        }
        let pid = 1000 + self.inner.next_pid.fetch_add(1, Ordering::SeqCst);
        let ignored_signals = self
            .inner
            .pending_ignores
            .lock()
            .unwrap()
            .remove(&k)
            .unwrap_or_default();
        tasks.insert(
            k,
            MemTask {
                status: TaskStatus::Created,
                pid,
                io,
                waiters: Vec::new(),
                exit: None,
                ignored_signals,
            },
        );
        Ok(())
    }

    fn start(&self, namespace: &str, id: &str) -> Result<u32, RuntimeError> {
        let args = {
            let containers = self.inner.containers.lock().unwrap();
            let record = containers
                .get(&key(namespace, id))
                .ok_or_else(|| RuntimeError::NotFound(format!("container {id}")))?;
            record
                .spec
                .process()
                .as_ref()
                .and_then(|p| p.args().clone())
                .unwrap_or_default()
        };

        let mut tasks = self.inner.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&key(namespace, id))
            .ok_or_else(|| RuntimeError::NotFound(format!("task {id}")))?;
        if task.status != TaskStatus::Created {
            return Err(RuntimeError::FailedPrecondition(format!(
                "task {id} already started"
            )));
        }
        task.status = TaskStatus::Running;
        if let Some(code) = simulate(&args, &mut task.io) {
            task.finish(code);
        }
        Ok(task.pid)
    }

    fn kill(&self, namespace: &str, id: &str, signal: i32) -> Result<(), RuntimeError> {
        let mut tasks = self.inner.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&key(namespace, id))
            .ok_or_else(|| RuntimeError::NotFound(format!("task {id}")))?;
        match task.status {
            TaskStatus::Stopped => Err(RuntimeError::NotFound(format!("process {id}"))),
            _ => {
                if signal != libc::SIGKILL && task.ignored_signals.contains(&signal) {
                    return Ok(());
                }
                task.finish(128 + signal);
                Ok(())
            }
        }
    }

    fn wait(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<crossbeam_channel::Receiver<ExitStatus>, RuntimeError> {
        let mut tasks = self.inner.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&key(namespace, id))
            .ok_or_else(|| RuntimeError::NotFound(format!("task {id}")))?;
        let (tx, rx) = unbounded();
        match task.exit {
            Some(exit) => {
                let _ = tx.send(exit);
            }
            None => task.waiters.push(tx),
        }
        Ok(rx)
    }

    fn status(&self, namespace: &str, id: &str) -> Result<TaskStatus, RuntimeError> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .get(&key(namespace, id))
            .map(|t| t.status)
            .ok_or_else(|| RuntimeError::NotFound(format!("task {id}")))
    }

    fn pid(&self, namespace: &str, id: &str) -> Result<u32, RuntimeError> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .get(&key(namespace, id))
            .map(|t| t.pid)
            .ok_or_else(|| RuntimeError::NotFound(format!("task {id}")))
    }

    fn delete(&self, namespace: &str, id: &str) -> Result<Option<ExitStatus>, RuntimeError> {
        let mut tasks = self.inner.tasks.lock().unwrap();
        let k = key(namespace, id);
        match tasks.get(&k) {
            None => Err(RuntimeError::NotFound(format!("task {id}"))),
            Some(task) if task.status == TaskStatus::Running => Err(
                RuntimeError::FailedPrecondition(format!("task {id} is running")),
            ),
            Some(_) => Ok(tasks.remove(&k).and_then(|t| t.exit)),
        }
    }

    fn resize_pty(
        &self,
        namespace: &str,
        id: &str,
        _columns: u16,
        _rows: u16,
    ) -> Result<(), RuntimeError> {
        self.status(namespace, id).map(|_| ())
    }
}

impl ImageStore for MemoryRuntime {
    fn resolve(&self, reference: &str, pull: PullPolicy) -> Result<ImageConfig, RuntimeError> {
        let images = self.inner.images.lock().unwrap();
        match images.get(reference) {
            Some(config) => Ok(config.clone()),
            None if pull == PullPolicy::Never => {
                Err(RuntimeError::NotFound(format!("image {reference}")))
            }
            None => Err(RuntimeError::NotFound(format!(
                "image {reference}: not present and no registry configured"
            ))),
        }
    }

    fn prepare_snapshot(
        &self,
        snapshotter: &str,
        snapshot_key: &str,
        _reference: &str,
    ) -> Result<(), RuntimeError> {
        let mut snapshots = self.inner.snapshots.lock().unwrap();
        if !snapshots.insert(format!("{snapshotter}/{snapshot_key}")) {
            return Err(RuntimeError::AlreadyExists(format!(
                "snapshot {snapshot_key}"
            )));
        }
        Ok(())
    }

    fn remove_snapshot(&self, snapshotter: &str, snapshot_key: &str) -> Result<(), RuntimeError> {
        let mut snapshots = self.inner.snapshots.lock().unwrap();
        if !snapshots.remove(&format!("{snapshotter}/{snapshot_key}")) {
            return Err(RuntimeError::NotFound(format!("snapshot {snapshot_key}")));
        }
        Ok(())
    }
}

impl VolumeStore for MemoryRuntime {
    fn create(&self, name: &str) -> Result<VolumeInfo, RuntimeError> {
        let mut volumes = self.inner.volumes.lock().unwrap();
        let info = volumes.entry(name.to_string()).or_insert_with(|| VolumeInfo {
            name: name.to_string(),
            mountpoint: PathBuf::from(format!("/var/lib/stevedore/volumes/{name}/_data")),
        });
        Ok(info.clone())
    }

    fn get(&self, name: &str) -> Result<VolumeInfo, RuntimeError> {
        self.inner
            .volumes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("volume {name}")))
    }

    fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.inner
            .volumes
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("volume {name}")))
    }

    fn list(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let mut all: Vec<VolumeInfo> = self.inner.volumes.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

impl NetworkStore for MemoryRuntime {
    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.inner.networks.lock().unwrap().contains(name))
    }

    fn list(&self) -> Result<Vec<String>, RuntimeError> {
        let mut all: Vec<String> = self.inner.networks.lock().unwrap().iter().cloned().collect();
        all.sort();
        Ok(all)
    }
}

/// A clonable in-memory writer, used to capture task output in tests.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use oci_spec::runtime::{ProcessBuilder, SpecBuilder};

    use super::*;

    fn record(namespace: &str, id: &str, args: &[&str]) -> ContainerRecord {
        let process = ProcessBuilder::default()
            .args(args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .build()
            .unwrap();
        let spec = SpecBuilder::default().process(process).build().unwrap();
        ContainerRecord {
            id: id.to_string(),
            namespace: namespace.to_string(),
            image: Some("alpine".to_string()),
            snapshotter: None,
            snapshot_key: None,
            runtime: "io.containerd.runc.v2".to_string(),
            labels: HashMap::new(),
            spec,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_echo_task_writes_and_exits() {
        let runtime = MemoryRuntime::new();
        ContainerStore::create(&runtime, record("default", "c1", &["echo", "hi"])).unwrap();

        let out = SharedBuffer::new();
        let io = TaskIo {
            stdout: Some(Box::new(out.clone())),
            ..Default::default()
        };
        TaskService::create(&runtime, "default", "c1", io).unwrap();
        let waiter = runtime.wait("default", "c1").unwrap();
        runtime.start("default", "c1").unwrap();

        assert_eq!(waiter.recv().unwrap().code, 0);
        assert_eq!(out.contents(), "hi\n");
        assert_eq!(runtime.status("default", "c1").unwrap(), TaskStatus::Stopped);
    }

    #[test]
    fn test_long_running_task_until_signal() {
        let runtime = MemoryRuntime::new();
        ContainerStore::create(&runtime, record("default", "c2", &["sleep", "infinity"])).unwrap();
        TaskService::create(&runtime, "default", "c2", TaskIo::default()).unwrap();
        let waiter = runtime.wait("default", "c2").unwrap();
        runtime.start("default", "c2").unwrap();
        assert_eq!(runtime.status("default", "c2").unwrap(), TaskStatus::Running);

        runtime.kill("default", "c2", libc::SIGTERM).unwrap();
        assert_eq!(waiter.recv().unwrap().code, 128 + libc::SIGTERM);
    }

    #[test]
    fn test_ignored_signal_requires_sigkill() {
        let runtime = MemoryRuntime::new();
        ContainerStore::create(&runtime, record("default", "c3", &["sleep", "infinity"])).unwrap();
        TaskService::create(&runtime, "default", "c3", TaskIo::default()).unwrap();
        runtime.start("default", "c3").unwrap();
        runtime.ignore_signal("default", "c3", libc::SIGTERM);

        runtime.kill("default", "c3", libc::SIGTERM).unwrap();
        assert_eq!(runtime.status("default", "c3").unwrap(), TaskStatus::Running);
        runtime.kill("default", "c3", libc::SIGKILL).unwrap();
        assert_eq!(runtime.status("default", "c3").unwrap(), TaskStatus::Stopped);
    }

    #[test]
    fn test_ignore_signal_staged_before_task_create() {
        let runtime = MemoryRuntime::new();
        ContainerStore::create(&runtime, record("default", "c6", &["sleep", "infinity"])).unwrap();
        // staged before the task exists, applied at create
        runtime.ignore_signal("default", "c6", libc::SIGTERM);
        TaskService::create(&runtime, "default", "c6", TaskIo::default()).unwrap();
        runtime.start("default", "c6").unwrap();

        runtime.kill("default", "c6", libc::SIGTERM).unwrap();
        assert_eq!(runtime.status("default", "c6").unwrap(), TaskStatus::Running);
        runtime.kill("default", "c6", libc::SIGKILL).unwrap();
        assert_eq!(runtime.status("default", "c6").unwrap(), TaskStatus::Stopped);
    }

    #[test]
    fn test_label_cas() {
        let runtime = MemoryRuntime::new();
        let mut rec = record("default", "c4", &["true"]);
        rec.labels.insert("a".into(), "1".into());
        let snapshot = rec.labels.clone();
        ContainerStore::create(&runtime, rec).unwrap();

        let mut stale = snapshot.clone();
        stale.insert("a".into(), "2".into());
        let err = runtime
            .update_labels(
                "default",
                "c4",
                &stale,
                HashMap::from([("b".into(), "2".into())]),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::LabelConflict(_)));

        runtime
            .update_labels(
                "default",
                "c4",
                &snapshot,
                HashMap::from([("b".into(), "2".into())]),
            )
            .unwrap();
        assert_eq!(
            ContainerStore::get(&runtime, "default", "c4").unwrap().labels["b"],
            "2"
        );
    }

    #[test]
    fn test_delete_running_task_refused() {
        let runtime = MemoryRuntime::new();
        ContainerStore::create(&runtime, record("default", "c5", &["sleep", "1d"])).unwrap();
        TaskService::create(&runtime, "default", "c5", TaskIo::default()).unwrap();
        runtime.start("default", "c5").unwrap();
        assert!(matches!(
            TaskService::delete(&runtime, "default", "c5"),
            Err(RuntimeError::FailedPrecondition(_))
        ));
        runtime.kill("default", "c5", libc::SIGKILL).unwrap();
        let exit = TaskService::delete(&runtime, "default", "c5").unwrap();
        assert_eq!(exit.unwrap().code, 128 + libc::SIGKILL);
    }
}
