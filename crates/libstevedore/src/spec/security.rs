//! `--security-opt` and the `--privileged` rewrite.
//!
//! Runs after capabilities and cgroups so the privileged branch can lift
//! the restrictions they put in place.

use std::path::PathBuf;

use oci_spec::runtime::{LinuxDeviceCgroupBuilder, LinuxSeccomp, Spec};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

#[derive(Debug, Clone, Default)]
struct SecurityOpts {
    seccomp_unconfined: bool,
    seccomp_profile: Option<PathBuf>,
    apparmor: Option<String>,
    no_new_privileges: bool,
    unconfine_system_paths: bool,
}

fn parse_security_opts(flags: &[String]) -> Result<SecurityOpts> {
    let mut opts = SecurityOpts::default();
    for flag in flags {
        let (key, value) = match flag.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (flag.as_str(), None),
        };
        match (key, value) {
            ("seccomp", Some("unconfined")) => opts.seccomp_unconfined = true,
            ("seccomp", Some(path)) => opts.seccomp_profile = Some(PathBuf::from(path)),
            ("apparmor", Some(profile)) => opts.apparmor = Some(profile.to_string()),
            ("no-new-privileges", None | Some("true")) => opts.no_new_privileges = true,
            ("no-new-privileges", Some("false")) => {}
            ("systempaths", Some("unconfined")) => opts.unconfine_system_paths = true,
            _ => {
                return Err(StevedoreError::InvalidInput(format!(
                    "invalid security option: {flag}"
                )))
            }
        }
    }
    Ok(opts)
}

fn load_seccomp_profile(path: &PathBuf) -> Result<LinuxSeccomp> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        StevedoreError::InvalidInput(format!(
            "seccomp profile {}: {err}",
            path.display()
        ))
    })?;
    serde_json::from_str(&content).map_err(|err| {
        StevedoreError::InvalidInput(format!(
            "seccomp profile {}: {err}",
            path.display()
        ))
    })
}

pub fn configure(opts: &ContainerOptions) -> Result<SpecMutator> {
    let security = parse_security_opts(&opts.security_opt)?;
    let privileged = opts.privileged;

    let seccomp = match (&security.seccomp_profile, security.seccomp_unconfined || privileged)
    {
        (_, true) => None,
        (Some(path), false) => Some(load_seccomp_profile(path)?),
        // the runtime-side default profile applies
        (None, false) => None,
    };

    Ok(Box::new(move |spec: &mut Spec| {
        let mut linux = spec.linux().clone().unwrap_or_default();
        linux.set_seccomp(seccomp);

        if privileged || security.unconfine_system_paths {
            linux.set_masked_paths(None);
            linux.set_readonly_paths(None);
        }
        if privileged {
            // lift the device cgroup to allow-all
            let mut resources = linux.resources().clone().unwrap_or_default();
            let allow_all = LinuxDeviceCgroupBuilder::default()
                .allow(true)
                .access("rwm")
                .build()
                .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
            resources.set_devices(Some(vec![allow_all]));
            linux.set_resources(Some(resources));
        }
        spec.set_linux(Some(linux));

        let mut process = spec.process().clone().unwrap_or_default();
        if security.no_new_privileges {
            process.set_no_new_privileges(Some(true));
        }
        if let Some(profile) = &security.apparmor {
            process.set_apparmor_profile(Some(profile.clone()));
        }
        spec.set_process(Some(process));
        Ok(())
    }))
}
