use std::path::PathBuf;

use clap::Parser;

// Subcommands follow the Docker/Podman command line surface so that
// stevedore can act as a drop-in `docker` alias for the verbs it supports.

mod create;
mod internal;
mod kill;
mod restart;
mod rm;
mod run;
mod stop;
mod volume;

pub use create::{Create, CreateOptions};
pub use internal::{Internal, InternalCmd, OciHook};
pub use kill::Kill;
pub use restart::Restart;
pub use rm::Rm;
pub use run::Run;
pub use stop::Stop;
pub use volume::{Volume, VolumeCmd, VolumeLs};

/// Container lifecycle verbs handled by the orchestrator.
#[derive(Parser, Debug)]
pub enum ContainerCmd {
    Create(Create),
    Run(Run),
    Rm(Rm),
    Kill(Kill),
    Stop(Stop),
    Restart(Restart),
}

/// Management verbs that only front an external catalog.
#[derive(Parser, Debug)]
pub enum ManagementCmd {
    #[clap(subcommand)]
    Volume(VolumeCmd),
    Internal(Internal),
}

/// Global options, forwarded verbatim into the OCI hook argv so that the
/// hook process sees the same data root and namespace as the caller.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Directory for persistent state (container state dirs, name registry)
    #[clap(long, default_value = "/var/lib/stevedore")]
    pub data_root: PathBuf,
    /// containerd namespace to operate in
    #[clap(long, short = 'n', env = "CONTAINERD_NAMESPACE", default_value = "default")]
    pub namespace: String,
    /// Address of the containerd socket
    #[clap(long, short = 'a', default_value = "/run/containerd/containerd.sock")]
    pub address: PathBuf,
    /// Enable debug output
    #[clap(long)]
    pub debug: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[clap(long)]
    pub log_level: Option<String>,
    /// Set the log format (text, json)
    #[clap(long)]
    pub log_format: Option<String>,
    /// Write logs to a file instead of stderr
    #[clap(long)]
    pub log: Option<PathBuf>,
}
