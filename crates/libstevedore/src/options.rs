//! Normalised container options.
//!
//! The CLI surface is wide and stringly typed; everything is folded into
//! [`ContainerOptions`] before the orchestrator sees it. Parsing helpers
//! for the multi-valued flags (env files, sizes, ulimits) live here too,
//! so the binary crate stays a thin mapping layer.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StevedoreError};
use crate::network::NetworkConfig;
use crate::restart::RestartPolicy;
use crate::runtime::PullPolicy;
use crate::volume::MountRequest;

pub const DEFAULT_INIT_BINARY: &str = "tini";
pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Linux,
    FreeBsd,
    Windows,
}

impl Platform {
    pub fn parse(flag: &str) -> Result<Self> {
        // `os/arch[/variant]` or a bare OS name.
        let os = flag.split('/').next().unwrap_or(flag);
        match os {
            "" | "linux" => Ok(Platform::Linux),
            "freebsd" => Ok(Platform::FreeBsd),
            "windows" => Ok(Platform::Windows),
            other => Err(StevedoreError::InvalidInput(format!(
                "unsupported platform: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::FreeBsd => "freebsd",
            Platform::Windows => "windows",
        }
    }
}

/// Where the root filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// An image reference resolved through the image service.
    Image(String),
    /// A prepared rootfs directory on the host, no snapshot involved.
    Rootfs(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ulimit {
    pub name: oci_spec::runtime::PosixRlimitType,
    pub soft: u64,
    pub hard: u64,
}

/// Maps the short `--ulimit` resource names onto the OCI vocabulary.
fn rlimit_type(name: &str) -> Option<oci_spec::runtime::PosixRlimitType> {
    use oci_spec::runtime::PosixRlimitType::*;
    Some(match name {
        "as" => RlimitAs,
        "core" => RlimitCore,
        "cpu" => RlimitCpu,
        "data" => RlimitData,
        "fsize" => RlimitFsize,
        "locks" => RlimitLocks,
        "memlock" => RlimitMemlock,
        "msgqueue" => RlimitMsgqueue,
        "nice" => RlimitNice,
        "nofile" => RlimitNofile,
        "nproc" => RlimitNproc,
        "rss" => RlimitRss,
        "rtprio" => RlimitRtprio,
        "rttime" => RlimitRttime,
        "sigpending" => RlimitSigpending,
        "stack" => RlimitStack,
        _ => return None,
    })
}

/// cgroup and device knobs, normalised to bytes and counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    pub cpus: Option<f64>,
    pub cpu_shares: Option<u64>,
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<u64>,
    pub cpu_rt_runtime: Option<i64>,
    pub cpu_rt_period: Option<u64>,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    pub memory: Option<i64>,
    pub memory_reservation: Option<i64>,
    pub memory_swap: Option<i64>,
    pub memory_swappiness: Option<u64>,
    pub pids_limit: Option<i64>,
    pub blkio_weight: Option<u16>,
    pub oom_kill_disable: bool,
    pub oom_score_adj: Option<i32>,
    pub devices: Vec<String>,
    pub ulimits: Vec<Ulimit>,
    pub rdt_class: Option<String>,
    pub cgroup_parent: Option<String>,
    /// Raw `KEY=VALUE` pairs for the unified (cgroup v2) map.
    pub cgroup_conf: Vec<(String, String)>,
    pub cgroupns: Option<String>,
}

/// Everything `create` needs, in one validated bundle.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub name: Option<String>,
    pub platform: Platform,
    pub source: ImageSource,
    pub pull: PullPolicy,
    pub snapshotter: String,
    pub runtime: String,

    /// `Some(vec![])` clears the image entrypoint; `None` keeps it.
    pub entrypoint: Option<Vec<String>>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub umask: Option<String>,
    pub group_add: Vec<String>,

    pub interactive: bool,
    pub tty: bool,
    pub detach: bool,
    pub remove_on_exit: bool,
    pub restart: RestartPolicy,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<u32>,

    pub labels: HashMap<String, String>,
    pub cidfile: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,

    pub network: NetworkConfig,
    pub hostname: Option<String>,

    pub mounts: Vec<MountRequest>,
    pub volumes_from: Vec<String>,
    pub read_only: bool,
    pub shm_size: Option<i64>,

    pub resources: Resources,

    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub sysctl: Vec<(String, String)>,
    pub pid_namespace: Option<String>,
    pub ipc_namespace: Option<String>,
    pub uts_namespace: Option<String>,

    pub gpus: Vec<String>,
    pub init: bool,
    pub init_binary: String,

    pub log_driver: String,
    pub log_opts: Vec<(String, String)>,

    /// Our own binary and the global flags needed to re-invoke it from
    /// OCI hooks and the logging URI.
    pub self_exe: PathBuf,
    pub global_args: Vec<String>,
}

impl ContainerOptions {
    pub fn new(source: ImageSource, self_exe: PathBuf) -> Self {
        Self {
            name: None,
            platform: Platform::Linux,
            source,
            pull: PullPolicy::Missing,
            snapshotter: DEFAULT_SNAPSHOTTER.to_string(),
            runtime: "io.containerd.runc.v2".to_string(),
            entrypoint: None,
            args: Vec::new(),
            env: Vec::new(),
            workdir: None,
            user: None,
            umask: None,
            group_add: Vec::new(),
            interactive: false,
            tty: false,
            detach: false,
            remove_on_exit: false,
            restart: RestartPolicy::No,
            stop_signal: None,
            stop_timeout: None,
            labels: HashMap::new(),
            cidfile: None,
            pidfile: None,
            network: NetworkConfig::default(),
            hostname: None,
            mounts: Vec::new(),
            volumes_from: Vec::new(),
            read_only: false,
            shm_size: None,
            resources: Resources::default(),
            privileged: false,
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            security_opt: Vec::new(),
            sysctl: Vec::new(),
            pid_namespace: None,
            ipc_namespace: None,
            uts_namespace: None,
            gpus: Vec::new(),
            init: false,
            init_binary: DEFAULT_INIT_BINARY.to_string(),
            log_driver: "json-file".to_string(),
            log_opts: Vec::new(),
            self_exe,
            global_args: Vec::new(),
        }
    }

    /// Cross-flag validation that the CLI parser cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.detach && (self.interactive || self.tty) {
            return Err(StevedoreError::InvalidInput(
                "flags -d and -i/-t cannot be specified together".to_string(),
            ));
        }
        if self.detach && self.remove_on_exit {
            return Err(StevedoreError::InvalidInput(
                "flags -d and --rm cannot be specified together".to_string(),
            ));
        }
        if self.tty && !self.interactive {
            return Err(StevedoreError::InvalidInput(
                "flag -t needs -i to be specified together".to_string(),
            ));
        }
        if self.remove_on_exit && self.restart != RestartPolicy::No {
            return Err(StevedoreError::InvalidInput(
                "flags --restart and --rm cannot be specified together".to_string(),
            ));
        }
        if let Some(adj) = self.resources.oom_score_adj {
            if !(-1000..=1000).contains(&adj) {
                return Err(StevedoreError::InvalidInput(format!(
                    "invalid value {adj}: range for oom score adj is [-1000, 1000]"
                )));
            }
        }
        if matches!(self.platform, Platform::FreeBsd) {
            let mode = crate::network::parse_modes(&self.network.modes)?;
            if mode != crate::network::NetworkMode::None {
                return Err(StevedoreError::InvalidInput(
                    "freebsd containers support only --net=none".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Parses a byte size with an optional `b`/`k`/`m`/`g` suffix
/// (case-insensitive, 1024-based).
pub fn parse_size(flag: &str) -> Result<i64> {
    let flag = flag.trim();
    if flag == "-1" {
        return Ok(-1);
    }
    let (digits, multiplier) = match flag.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let mult = match c.to_ascii_lowercase() {
                'b' => 1,
                'k' => 1 << 10,
                'm' => 1 << 20,
                'g' => 1 << 30,
                _ => {
                    return Err(StevedoreError::InvalidInput(format!(
                        "invalid size: {flag}"
                    )))
                }
            };
            (&flag[..idx], mult)
        }
        _ => (flag, 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| StevedoreError::InvalidInput(format!("invalid size: {flag}")))?;
    Ok(value * multiplier)
}

/// Splits a `KEY=VALUE` flag. A bare `KEY` resolves through
/// `fallback(KEY)`; returning `None` drops the entry.
fn split_kv(line: &str, fallback: impl Fn(&str) -> Option<String>) -> Option<(String, String)> {
    match line.split_once('=') {
        Some((key, value)) => Some((key.to_string(), value.to_string())),
        None => fallback(line).map(|value| (line.to_string(), value)),
    }
}

/// Parses `-e/--env` flags. A bare `KEY` inherits the value from our own
/// environment, and is dropped when unset.
pub fn parse_env_flags(flags: &[String]) -> Vec<String> {
    flags
        .iter()
        .filter_map(|f| split_kv(f, |key| env::var(key).ok()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect()
}

/// Parses `-l/--label` flags. A bare `KEY` gets an empty value.
pub fn parse_label_flags(flags: &[String]) -> HashMap<String, String> {
    flags
        .iter()
        .filter_map(|f| split_kv(f, |_| Some(String::new())))
        .collect()
}

fn read_kv_file(
    path: &Path,
    fallback: impl Fn(&str) -> Option<String> + Copy,
) -> Result<Vec<(String, String)>> {
    let content = fs::read_to_string(path).map_err(|e| {
        StevedoreError::InvalidInput(format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| split_kv(line, fallback))
        .collect())
}

/// Reads an `--env-file`: one `KEY=VALUE` per line, `#` comments and
/// blanks skipped, bare keys inherited from our environment.
pub fn parse_env_file(path: &Path) -> Result<Vec<String>> {
    Ok(read_kv_file(path, |key| env::var(key).ok())?
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect())
}

/// Reads a `--label-file` with the same line grammar; bare keys get an
/// empty value.
pub fn parse_label_file(path: &Path) -> Result<Vec<(String, String)>> {
    read_kv_file(path, |_| Some(String::new()))
}

/// Parses `--ulimit name=soft[:hard]`; a missing hard limit mirrors soft.
pub fn parse_ulimit(flag: &str) -> Result<Ulimit> {
    let invalid = || StevedoreError::InvalidInput(format!("invalid ulimit: {flag}"));
    let (name, limits) = flag.split_once('=').ok_or_else(invalid)?;
    let name = rlimit_type(name).ok_or_else(invalid)?;
    let (soft, hard) = match limits.split_once(':') {
        Some((s, h)) => (
            s.parse().map_err(|_| invalid())?,
            h.parse().map_err(|_| invalid())?,
        ),
        None => {
            let soft = limits.parse().map_err(|_| invalid())?;
            (soft, soft)
        }
    };
    Ok(Ulimit { name, soft, hard })
}

/// Parses a `--sysctl key=value` flag.
pub fn parse_sysctl(flag: &str) -> Result<(String, String)> {
    flag.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| StevedoreError::InvalidInput(format!("invalid sysctl: {flag}")))
}
