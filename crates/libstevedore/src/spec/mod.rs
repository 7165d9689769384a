//! OCI runtime spec assembly.
//!
//! `assemble` starts from a platform base spec and applies an ordered list
//! of mutators, one per flag family. Ordering is load-bearing: process
//! setup runs before security (capabilities attach to the process),
//! mounts before init injection (the init bind must win), and the
//! privileged rewrite last so it can undo earlier restrictions.

pub mod capabilities;
pub mod cgroups;
pub mod gpu;
pub mod init;
pub mod mounts;
pub mod namespaces;
pub mod platform;
pub mod process;
pub mod security;

use std::collections::HashMap;

use oci_spec::runtime::Spec;

use crate::error::Result;
use crate::idgen;
use crate::network::{NetworkMode, NetworkPlan};
use crate::options::{ContainerOptions, ImageSource, Platform};
use crate::runtime::ImageConfig;

/// A single deferred change to the spec under assembly.
pub type SpecMutator = Box<dyn FnOnce(&mut Spec) -> Result<()>>;

/// Inputs the assembler needs beyond the options themselves.
pub struct SpecInput<'a> {
    pub id: &'a str,
    pub image: &'a ImageConfig,
    pub plan: &'a NetworkPlan,
    /// Extra mounts produced by volume resolution.
    pub resolved_mounts: Vec<oci_spec::runtime::Mount>,
    /// PID namespace to join for `--pid container:<id>`, resolved from the
    /// target's running task.
    pub pidns_path: Option<std::path::PathBuf>,
    /// Full label map, mirrored into the spec annotations.
    pub labels: &'a HashMap<String, String>,
}

pub fn assemble(opts: &ContainerOptions, input: SpecInput<'_>) -> Result<Spec> {
    let mut spec = platform::base(opts.platform)?;

    let hostname = match input.plan.mode() {
        // A hostname needs a private UTS namespace.
        NetworkMode::Host => None,
        _ => Some(
            opts.hostname
                .clone()
                .unwrap_or_else(|| idgen::truncate(input.id).to_string()),
        ),
    };

    let mut mutators: Vec<SpecMutator> = Vec::new();

    mutators.push(process::configure(opts, input.image)?);
    mutators.push(mounts::configure(
        opts,
        input.plan,
        input.resolved_mounts,
    )?);
    mutators.push(namespaces::configure(opts, input.plan, input.pidns_path.clone())?);

    if matches!(opts.platform, Platform::Linux) {
        mutators.push(cgroups::configure(opts, input.id)?);
        mutators.push(capabilities::configure(opts)?);
        mutators.push(security::configure(opts)?);
        mutators.push(gpu::configure(opts)?);
        mutators.push(init::configure(opts)?);
    }

    // network hooks first so later mutators can append their own
    if let Some(hooks) = &input.plan.hooks {
        spec.set_hooks(Some(hooks.clone()));
    }

    for mutator in mutators {
        mutator(&mut spec)?;
    }

    // unconditional: the base spec carries a default hostname that must
    // be cleared for host networking
    spec.set_hostname(hostname);
    spec.set_annotations(Some(input.labels.clone()));

    if let ImageSource::Rootfs(path) = &opts.source {
        let root = oci_spec::runtime::RootBuilder::default()
            .path(path.clone())
            .readonly(opts.read_only)
            .build()
            .map_err(|err| crate::error::StevedoreError::InvalidInput(err.to_string()))?;
        spec.set_root(Some(root));
    } else if let Some(root) = spec.root() {
        let root = oci_spec::runtime::RootBuilder::default()
            .path(root.path().clone())
            .readonly(opts.read_only)
            .build()
            .map_err(|err| crate::error::StevedoreError::InvalidInput(err.to_string()))?;
        spec.set_root(Some(root));
    }

    platform::finalize(opts.platform, &mut spec)?;
    Ok(spec)
}
