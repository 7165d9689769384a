//! Named interfaces to the runtime service and its satellite catalogs.
//!
//! The orchestrator only ever talks to containerd, the image service, the
//! volume store and the CNI catalog through these traits. The wire
//! transports live outside this crate; [`memory`] provides a complete
//! in-process engine used by the test suite and the hermetic backend.

pub mod memory;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("label conflict on {0}: concurrent modification")]
    LabelConflict(String),
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

/// The runtime-service-owned record of a created container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub namespace: String,
    /// Image reference; `None` marks a `--rootfs` container.
    pub image: Option<String>,
    pub snapshotter: Option<String>,
    pub snapshot_key: Option<String>,
    pub runtime: String,
    pub labels: HashMap<String, String>,
    pub spec: Spec,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
}

/// Attach description for a new task. Writers receive the task's output
/// when the invocation stays in the foreground.
#[derive(Default)]
pub struct TaskIo {
    pub tty: bool,
    pub stdin: bool,
    pub log_uri: Option<String>,
    pub stdout: Option<Box<dyn Write + Send>>,
    pub stderr: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TaskIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskIo")
            .field("tty", &self.tty)
            .field("stdin", &self.stdin)
            .field("log_uri", &self.log_uri)
            .finish()
    }
}

/// Container record catalog (containerd's containers service).
pub trait ContainerStore: Send + Sync {
    fn create(&self, record: ContainerRecord) -> Result<(), RuntimeError>;
    fn get(&self, namespace: &str, id: &str) -> Result<ContainerRecord, RuntimeError>;
    fn list(&self, namespace: &str) -> Result<Vec<String>, RuntimeError>;
    /// Compare-and-set label update: fails with `LabelConflict` when the
    /// current labels do not match `expected`.
    fn update_labels(
        &self,
        namespace: &str,
        id: &str,
        expected: &HashMap<String, String>,
        updates: HashMap<String, String>,
    ) -> Result<(), RuntimeError>;
    fn delete(&self, namespace: &str, id: &str) -> Result<(), RuntimeError>;
}

/// Task lifecycle (containerd's tasks service).
pub trait TaskService: Send + Sync {
    fn create(&self, namespace: &str, id: &str, io: TaskIo) -> Result<(), RuntimeError>;
    fn start(&self, namespace: &str, id: &str) -> Result<u32, RuntimeError>;
    fn kill(&self, namespace: &str, id: &str, signal: i32) -> Result<(), RuntimeError>;
    /// Subscribes to the task's exit status. Callers subscribe *before*
    /// start so the exit of a short-lived task is never missed.
    fn wait(&self, namespace: &str, id: &str) -> Result<Receiver<ExitStatus>, RuntimeError>;
    fn status(&self, namespace: &str, id: &str) -> Result<TaskStatus, RuntimeError>;
    fn pid(&self, namespace: &str, id: &str) -> Result<u32, RuntimeError>;
    fn delete(&self, namespace: &str, id: &str) -> Result<Option<ExitStatus>, RuntimeError>;
    fn resize_pty(
        &self,
        namespace: &str,
        id: &str,
        columns: u16,
        rows: u16,
    ) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    #[default]
    Missing,
    Never,
}

impl std::str::FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(PullPolicy::Always),
            "missing" => Ok(PullPolicy::Missing),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!("invalid pull policy: {other}")),
        }
    }
}

/// The runtime-relevant slice of an image's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// Destinations the image declares as volumes.
    pub volumes: Vec<String>,
    pub stop_signal: Option<String>,
}

/// Image resolution and snapshot allocation (image service + snapshotter).
pub trait ImageStore: Send + Sync {
    fn resolve(&self, reference: &str, pull: PullPolicy) -> Result<ImageConfig, RuntimeError>;
    fn prepare_snapshot(
        &self,
        snapshotter: &str,
        key: &str,
        reference: &str,
    ) -> Result<(), RuntimeError>;
    fn remove_snapshot(&self, snapshotter: &str, key: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// The volume catalog.
pub trait VolumeStore: Send + Sync {
    /// Creates the named volume, or returns it if it already exists.
    fn create(&self, name: &str) -> Result<VolumeInfo, RuntimeError>;
    fn get(&self, name: &str) -> Result<VolumeInfo, RuntimeError>;
    fn remove(&self, name: &str) -> Result<(), RuntimeError>;
    fn list(&self) -> Result<Vec<VolumeInfo>, RuntimeError>;
}

/// The CNI network-configuration catalog.
pub trait NetworkStore: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, RuntimeError>;
    fn list(&self) -> Result<Vec<String>, RuntimeError>;
}

/// Handle bundle passed through every orchestrator entry point.
#[derive(Clone)]
pub struct Services {
    pub containers: Arc<dyn ContainerStore>,
    pub tasks: Arc<dyn TaskService>,
    pub images: Arc<dyn ImageStore>,
    pub volumes: Arc<dyn VolumeStore>,
    pub networks: Arc<dyn NetworkStore>,
}
