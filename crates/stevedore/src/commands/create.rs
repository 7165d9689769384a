//! Handles `create`, and folds the wide CLI flag surface into the
//! normalised option bundle the orchestrator consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use libdocker_cli::{Create, CreateOptions};
use libstevedore::network::{ports, NetworkConfig};
use libstevedore::options::{
    self, ContainerOptions, ImageSource, Platform, Resources,
};
use libstevedore::restart::RestartPolicy;
use libstevedore::runtime::PullPolicy;
use libstevedore::volume;

use crate::context::Context;

pub fn create(ctx: &Context, cmd: Create) -> Result<i32> {
    let opts = to_options(ctx, &cmd.options, &cmd.image, &cmd.args, false)?;
    let container = libstevedore::create::create_container(
        &ctx.services,
        &ctx.store,
        &ctx.names,
        &ctx.namespace,
        &opts,
    )?;
    println!("{}", container.id());
    Ok(0)
}

/// Maps the raw flags onto [`ContainerOptions`]. Shared by `create` and
/// `run`; only the latter sets `detach`.
pub(crate) fn to_options(
    ctx: &Context,
    cli: &CreateOptions,
    image: &str,
    args: &[String],
    detach: bool,
) -> Result<ContainerOptions> {
    if cli.isolation != "default" {
        bail!("--isolation {} is not supported", cli.isolation);
    }
    if cli.verify != "none" || cli.cosign_key.is_some() {
        bail!("image verification is not supported by this build");
    }
    if cli.kernel_memory.is_some() {
        tracing::warn!("--kernel-memory is deprecated and ignored");
    }

    let source = if cli.rootfs {
        ImageSource::Rootfs(PathBuf::from(image))
    } else {
        ImageSource::Image(image.to_string())
    };
    let self_exe =
        std::env::current_exe().context("failed to locate our own executable")?;
    let mut opts = ContainerOptions::new(source, self_exe);
    opts.global_args = ctx.global_args.clone();

    opts.name = cli.name.clone();
    if let Some(platform) = &cli.platform {
        opts.platform = Platform::parse(platform)?;
    }
    opts.pull = cli.pull.parse::<PullPolicy>().map_err(|e| anyhow!(e))?;
    opts.snapshotter = options::DEFAULT_SNAPSHOTTER.to_string();
    opts.runtime = cli.runtime.clone();

    // An explicit empty string clears the image entrypoint.
    opts.entrypoint = cli.entrypoint.as_ref().map(|e| {
        if e.is_empty() {
            Vec::new()
        } else {
            vec![e.clone()]
        }
    });
    opts.args = args.to_vec();

    let mut env = Vec::new();
    for file in &cli.env_file {
        env.extend(options::parse_env_file(Path::new(file))?);
    }
    env.extend(options::parse_env_flags(&cli.env));
    opts.env = env;
    opts.workdir = cli.workdir.clone();
    opts.user = cli.user.clone();
    opts.umask = cli.umask.clone();
    opts.group_add = cli.group_add.clone();

    opts.interactive = cli.interactive;
    opts.tty = cli.tty;
    opts.detach = detach;
    opts.remove_on_exit = cli.rm;
    opts.restart = RestartPolicy::parse(&cli.restart)?;
    opts.stop_signal = cli.stop_signal.clone();
    opts.stop_timeout = cli.stop_timeout;

    let mut labels = HashMap::new();
    for file in &cli.label_file {
        labels.extend(options::parse_label_file(Path::new(file))?);
    }
    labels.extend(options::parse_label_flags(&cli.label));
    opts.labels = labels;
    opts.cidfile = cli.cidfile.as_ref().map(PathBuf::from);
    opts.pidfile = cli.pidfile.as_ref().map(PathBuf::from);

    opts.network = NetworkConfig {
        modes: cli.network.clone(),
        dns: cli.dns.clone(),
        dns_search: cli.dns_search.clone(),
        dns_opt: cli.dns_opt.clone(),
        ports: ports::parse_all(&cli.publish)?,
        ip: cli.ip.clone(),
        mac_address: cli.mac_address.clone(),
        add_hosts: cli.add_host.clone(),
        host_gateway_ip: String::new(),
    };
    opts.hostname = cli.hostname.clone();

    let mut mounts = Vec::new();
    for flag in &cli.volume {
        mounts.push(volume::parse_volume_flag(flag)?);
    }
    for flag in &cli.mount {
        mounts.push(volume::parse_mount_flag(flag)?);
    }
    for flag in &cli.tmpfs {
        mounts.push(volume::parse_tmpfs_flag(flag)?);
    }
    opts.mounts = mounts;
    opts.volumes_from = cli.volumes_from.clone();
    opts.read_only = cli.read_only;
    opts.shm_size = cli
        .shm_size
        .as_deref()
        .map(options::parse_size)
        .transpose()?;

    opts.resources = resources(cli)?;

    opts.privileged = cli.privileged;
    opts.cap_add = cli.cap_add.clone();
    opts.cap_drop = cli.cap_drop.clone();
    opts.security_opt = cli.security_opt.clone();
    opts.sysctl = cli
        .sysctl
        .iter()
        .map(|f| options::parse_sysctl(f))
        .collect::<Result<_, _>>()?;
    opts.pid_namespace = cli.pid.clone();
    opts.ipc_namespace = cli.ipc.clone();
    opts.uts_namespace = cli.uts.clone();

    opts.gpus = cli.gpus.clone().into_iter().collect();
    opts.init = cli.init;
    if let Some(init_binary) = &cli.init_binary {
        opts.init_binary = init_binary.clone();
    }

    opts.log_driver = cli.log_driver.clone();
    opts.log_opts = cli
        .log_opt
        .iter()
        .map(|f| parse_kv(f, "--log-opt"))
        .collect::<Result<_>>()?;

    Ok(opts)
}

fn parse_kv(flag: &str, what: &str) -> Result<(String, String)> {
    flag.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| anyhow!("invalid {what} value: {flag}"))
}

fn resources(cli: &CreateOptions) -> Result<Resources> {
    let memory_swappiness = match cli.memory_swappiness {
        None => None,
        Some(s) if (0..=100).contains(&s) => Some(s as u64),
        Some(s) => bail!("invalid value {s}: range for memory swappiness is [0, 100]"),
    };
    Ok(Resources {
        cpus: cli.cpus,
        cpu_shares: cli.cpu_shares,
        cpu_quota: cli.cpu_quota,
        cpu_period: cli.cpu_period,
        cpu_rt_runtime: cli.cpu_rt_runtime,
        cpu_rt_period: cli.cpu_rt_period,
        cpuset_cpus: cli.cpuset_cpus.clone(),
        cpuset_mems: cli.cpuset_mems.clone(),
        memory: cli.memory.as_deref().map(options::parse_size).transpose()?,
        memory_reservation: cli
            .memory_reservation
            .as_deref()
            .map(options::parse_size)
            .transpose()?,
        memory_swap: cli
            .memory_swap
            .as_deref()
            .map(options::parse_size)
            .transpose()?,
        memory_swappiness,
        pids_limit: (cli.pids_limit >= 0).then_some(cli.pids_limit),
        blkio_weight: cli.blkio_weight,
        oom_kill_disable: cli.oom_kill_disable,
        oom_score_adj: cli.oom_score_adj,
        devices: cli.device.clone(),
        ulimits: cli
            .ulimit
            .iter()
            .map(|f| options::parse_ulimit(f))
            .collect::<Result<_, _>>()?,
        rdt_class: cli.rdt_class.clone(),
        cgroup_parent: cli.cgroup_parent.clone(),
        cgroup_conf: cli
            .cgroup_conf
            .iter()
            .map(|f| parse_kv(f, "--cgroup-conf"))
            .collect::<Result<_>>()?,
        cgroupns: cli.cgroupns.clone(),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use libdocker_cli::GlobalOpts;
    use libstevedore::volume::MountSource;

    use super::*;

    fn context(tmp: &tempfile::TempDir) -> Context {
        Context::open(&GlobalOpts {
            data_root: tmp.path().to_path_buf(),
            namespace: "default".to_string(),
            address: PathBuf::from("memory://"),
            debug: false,
            log_level: None,
            log_format: None,
            log: None,
        })
        .unwrap()
    }

    fn parse(argv: &[&str]) -> Create {
        let mut full = vec!["create"];
        full.extend(argv);
        Create::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults_map_through() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["alpine", "echo", "hi"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();

        assert_eq!(opts.source, ImageSource::Image("alpine".into()));
        assert_eq!(opts.args, vec!["echo".to_string(), "hi".to_string()]);
        assert_eq!(opts.pull, PullPolicy::Missing);
        assert_eq!(opts.restart, RestartPolicy::No);
        assert_eq!(opts.network.modes, vec!["bridge".to_string()]);
        assert_eq!(opts.resources.pids_limit, None);
        assert!(opts.entrypoint.is_none());
        assert!(opts.stop_signal.is_none());
    }

    #[test]
    fn test_empty_entrypoint_clears_image_entrypoint() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["--entrypoint", "", "alpine"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.entrypoint, Some(vec![]));

        let cmd = parse(&["--entrypoint", "/bin/sh", "alpine"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.entrypoint, Some(vec!["/bin/sh".to_string()]));
    }

    #[test]
    fn test_sizes_and_limits() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&[
            "--memory",
            "512m",
            "--memory-swap",
            "-1",
            "--shm-size",
            "64m",
            "--pids-limit",
            "100",
            "alpine",
        ]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.resources.memory, Some(512 << 20));
        assert_eq!(opts.resources.memory_swap, Some(-1));
        assert_eq!(opts.shm_size, Some(64 << 20));
        assert_eq!(opts.resources.pids_limit, Some(100));
    }

    #[test]
    fn test_memory_swappiness_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["--memory-swappiness", "101", "alpine"]);
        let err =
            to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap_err();
        assert!(err.to_string().contains("memory swappiness"));

        let cmd = parse(&["--memory-swappiness", "60", "alpine"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.resources.memory_swappiness, Some(60));
    }

    #[test]
    fn test_mount_flags_collected_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&[
            "-v",
            "/host:/data:ro",
            "--tmpfs",
            "/scratch",
            "alpine",
        ]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.mounts.len(), 2);
        assert_eq!(
            opts.mounts[0].source,
            MountSource::Bind(PathBuf::from("/host"))
        );
        assert!(opts.mounts[0].read_only());
        assert_eq!(opts.mounts[1].source, MountSource::Tmpfs);
    }

    #[test]
    fn test_rootfs_flag_switches_source() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["--rootfs", "/srv/rootfs", "sh"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(opts.source, ImageSource::Rootfs(PathBuf::from("/srv/rootfs")));
    }

    #[test]
    fn test_short_h_is_hostname_not_help() {
        let cmd = parse(&["-h", "web01", "alpine"]);
        assert_eq!(cmd.options.hostname.as_deref(), Some("web01"));

        // help is still reachable through the long flag
        let err = Create::try_parse_from(["create", "--help"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_unsupported_isolation_and_verify() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["--isolation", "hyperv", "alpine"]);
        assert!(to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).is_err());

        let cmd = parse(&["--verify", "cosign", "alpine"]);
        assert!(to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).is_err());
    }

    #[test]
    fn test_log_opts_require_key_value() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp);
        let cmd = parse(&["--log-opt", "max-size=10m", "alpine"]);
        let opts = to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).unwrap();
        assert_eq!(
            opts.log_opts,
            vec![("max-size".to_string(), "10m".to_string())]
        );

        let cmd = parse(&["--log-opt", "bogus", "alpine"]);
        assert!(to_options(&ctx, &cmd.options, &cmd.image, &cmd.args, false).is_err());
    }
}
