//! Flag surface shared by `create` and `run`.
use clap::Parser;

/// Create a new container without starting it
// -h belongs to --hostname here, so help is long-only
#[derive(Parser, Debug)]
#[clap(disable_help_flag = true)]
pub struct Create {
    /// Print help
    #[clap(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,

    #[clap(flatten)]
    pub options: CreateOptions,

    /// Image reference, or a rootfs path when --rootfs is given
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub image: String,

    /// Command and arguments to run inside the container
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// The ~80 flag concerns accepted by `create` and `run`. Names are
/// contract: they match docker/nerdctl one-for-one.
#[derive(Parser, Debug, Default)]
pub struct CreateOptions {
    // -- Basic --
    /// Keep STDIN open even if not attached
    #[clap(short, long)]
    pub interactive: bool,
    /// Allocate a pseudo-TTY (requires --interactive)
    #[clap(short, long)]
    pub tty: bool,
    /// Automatically remove the container when it exits
    #[clap(long)]
    pub rm: bool,
    /// Restart policy (no, always, on-failure[:N], unless-stopped)
    #[clap(long, default_value = "no")]
    pub restart: String,
    /// Pull image before creating (always, missing, never)
    #[clap(long, default_value = "missing")]
    pub pull: String,
    /// Signal to stop the container (defaults to the image's STOPSIGNAL,
    /// then SIGTERM)
    #[clap(long)]
    pub stop_signal: Option<String>,
    /// Seconds to wait for stop before killing it
    #[clap(long)]
    pub stop_timeout: Option<u32>,

    // -- Identification --
    /// Assign a name to the container
    #[clap(long)]
    pub name: Option<String>,
    /// Write the full container ID to the file
    #[clap(long)]
    pub cidfile: Option<String>,
    /// Write the task pid to the file
    #[clap(long)]
    pub pidfile: Option<String>,
    /// Set metadata on the container (key=value)
    #[clap(short, long)]
    pub label: Vec<String>,
    /// Read labels from a line-delimited file
    #[clap(long)]
    pub label_file: Vec<String>,

    // -- Rootfs / process --
    /// The first argument is not an image but a rootfs directory
    #[clap(long)]
    pub rootfs: bool,
    /// Mount the container's root filesystem read-only
    #[clap(long)]
    pub read_only: bool,
    /// Overwrite the default ENTRYPOINT of the image ("" clears it)
    #[clap(long)]
    pub entrypoint: Option<String>,
    /// Working directory inside the container
    #[clap(short, long)]
    pub workdir: Option<String>,
    /// Set environment variables
    #[clap(short, long)]
    pub env: Vec<String>,
    /// Read environment variables from a line-delimited file
    #[clap(long)]
    pub env_file: Vec<String>,

    // -- Networking --
    /// Connect the container to a network (none, host, bridge, <CNI name>, container:<ref>)
    #[clap(long, alias = "net", default_value = "bridge")]
    pub network: Vec<String>,
    /// Custom DNS servers
    #[clap(long)]
    pub dns: Vec<String>,
    /// Custom DNS search domains
    #[clap(long)]
    pub dns_search: Vec<String>,
    /// Custom DNS options
    #[clap(long, alias = "dns-option")]
    pub dns_opt: Vec<String>,
    /// Publish a container's port to the host ([hostip:]hostport[:containerport][/proto])
    #[clap(short, long)]
    pub publish: Vec<String>,
    /// Static IP address within the CNI network
    #[clap(long)]
    pub ip: Option<String>,
    /// Container host name
    #[clap(short = 'h', long)]
    pub hostname: Option<String>,
    /// Container MAC address
    #[clap(long)]
    pub mac_address: Option<String>,
    /// Add a custom host-to-IP mapping (host:ip, ip may be "host-gateway")
    #[clap(long)]
    pub add_host: Vec<String>,
    /// IPC namespace to use (host, private)
    #[clap(long)]
    pub ipc: Option<String>,

    // -- Cgroups / namespaces --
    /// Number of CPUs
    #[clap(long)]
    pub cpus: Option<f64>,
    /// Memory limit (e.g. 512m)
    #[clap(short, long)]
    pub memory: Option<String>,
    /// Memory soft limit
    #[clap(long)]
    pub memory_reservation: Option<String>,
    /// Swap limit equal to memory plus swap; -1 for unlimited swap
    #[clap(long, allow_negative_numbers = true)]
    pub memory_swap: Option<String>,
    /// Tune container memory swappiness (0 to 100)
    #[clap(long)]
    pub memory_swappiness: Option<i64>,
    /// Kernel memory limit (deprecated, ignored by modern kernels)
    #[clap(long, hide = true)]
    pub kernel_memory: Option<String>,
    /// Disable the OOM killer for the container
    #[clap(long)]
    pub oom_kill_disable: bool,
    /// Tune the host's OOM preference (-1000 to 1000)
    #[clap(long)]
    pub oom_score_adj: Option<i32>,
    /// PID namespace to use (host, container:<ref>)
    #[clap(long)]
    pub pid: Option<String>,
    /// UTS namespace to use (host)
    #[clap(long)]
    pub uts: Option<String>,
    /// Tune container pids limit (-1 for unlimited)
    #[clap(long, default_value = "-1")]
    pub pids_limit: i64,
    /// Configure cgroup v2 knobs directly (key=value)
    #[clap(long)]
    pub cgroup_conf: Vec<String>,
    /// Block IO weight (10 to 1000)
    #[clap(long)]
    pub blkio_weight: Option<u16>,
    /// Cgroup namespace to use (host, private)
    #[clap(long)]
    pub cgroupns: Option<String>,
    /// Parent cgroup for the container
    #[clap(long)]
    pub cgroup_parent: Option<String>,
    /// CPUs in which to allow execution (0-3, 0,1)
    #[clap(long)]
    pub cpuset_cpus: Option<String>,
    /// Memory nodes in which to allow execution
    #[clap(long)]
    pub cpuset_mems: Option<String>,
    /// CPU shares (relative weight)
    #[clap(long)]
    pub cpu_shares: Option<u64>,
    /// Limit CPU CFS quota
    #[clap(long)]
    pub cpu_quota: Option<i64>,
    /// Limit CPU CFS period
    #[clap(long)]
    pub cpu_period: Option<u64>,
    /// Limit CPU realtime runtime in microseconds
    #[clap(long)]
    pub cpu_rt_runtime: Option<i64>,
    /// Limit CPU realtime period in microseconds
    #[clap(long)]
    pub cpu_rt_period: Option<u64>,
    /// Add a host device to the container (hostpath[:containerpath][:mode])
    #[clap(long)]
    pub device: Vec<String>,
    /// Ulimit options (name=soft[:hard])
    #[clap(long)]
    pub ulimit: Vec<String>,
    /// Intel RDT class of service for the container
    #[clap(long)]
    pub rdt_class: Option<String>,

    // -- User / security --
    /// Username or UID (format: name|uid[:group|gid])
    #[clap(short, long)]
    pub user: Option<String>,
    /// Umask inside the container
    #[clap(long)]
    pub umask: Option<String>,
    /// Additional groups to join
    #[clap(long)]
    pub group_add: Vec<String>,
    /// Security options (seccomp=, apparmor=, no-new-privileges, ...)
    #[clap(long)]
    pub security_opt: Vec<String>,
    /// Add Linux capabilities
    #[clap(long)]
    pub cap_add: Vec<String>,
    /// Drop Linux capabilities
    #[clap(long)]
    pub cap_drop: Vec<String>,
    /// Give extended privileges to this container
    #[clap(long)]
    pub privileged: bool,

    // -- Runtime / extensions --
    /// Runtime to use for this container
    #[clap(long, default_value = "io.containerd.runc.v2")]
    pub runtime: String,
    /// Sysctl options (key=value)
    #[clap(long)]
    pub sysctl: Vec<String>,
    /// GPU devices to add to the container ("all", or a CSV spec)
    #[clap(long)]
    pub gpus: Option<String>,
    /// Bind mount a volume ([source:]destination[:options])
    #[clap(short, long)]
    pub volume: Vec<String>,
    /// Mount a tmpfs directory (destination[:options])
    #[clap(long)]
    pub tmpfs: Vec<String>,
    /// Attach a filesystem mount to the container (CSV spec)
    #[clap(long)]
    pub mount: Vec<String>,
    /// Mount volumes from the specified container(s)
    #[clap(long)]
    pub volumes_from: Vec<String>,
    /// Run an init inside the container that forwards signals and reaps processes
    #[clap(long)]
    pub init: bool,
    /// The custom binary to use as the init process
    #[clap(long)]
    pub init_binary: Option<String>,
    /// Set platform (e.g. linux/amd64)
    #[clap(long)]
    pub platform: Option<String>,
    /// Windows container isolation technology (default, host, process, hyperv)
    #[clap(long, default_value = "default")]
    pub isolation: String,
    /// Size of /dev/shm (e.g. 64m)
    #[clap(long)]
    pub shm_size: Option<String>,
    /// Logging driver for the container (name, or a URI)
    #[clap(long, default_value = "json-file")]
    pub log_driver: String,
    /// Log driver options (key=value)
    #[clap(long)]
    pub log_opt: Vec<String>,
    /// Image verifier to use on pull (none, cosign, notation)
    #[clap(long, default_value = "none")]
    pub verify: String,
    /// Path to the public key file for cosign verification
    #[clap(long)]
    pub cosign_key: Option<String>,
    /// Multiaddr of the IPFS API when pulling ipfs:// references
    #[clap(long)]
    pub ipfs_address: Option<String>,
}
