//! `--init`: run the user command under a minimal init process.
//!
//! The init binary is bind-mounted read-only into the container at
//! `/sbin/<basename>` and prefixed onto the argv with a `--` separator.

use std::env;
use std::path::{Path, PathBuf};

use oci_spec::runtime::{MountBuilder, Spec};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

/// Finds the init binary on the host: absolute paths are taken as given,
/// anything else is searched on PATH.
fn locate(binary: &str) -> Result<PathBuf> {
    let path = Path::new(binary);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    for dir in env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default()
    {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(StevedoreError::InvalidInput(format!(
        "init binary {binary} not found in PATH"
    )))
}

pub fn configure(opts: &ContainerOptions) -> Result<SpecMutator> {
    if !opts.init {
        return Ok(Box::new(|_spec: &mut Spec| Ok(())));
    }

    let host_path = locate(&opts.init_binary)?;
    let basename = host_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StevedoreError::InvalidInput(format!(
                "invalid init binary path: {}",
                host_path.display()
            ))
        })?;
    let container_path = PathBuf::from("/sbin").join(basename);

    Ok(Box::new(move |spec: &mut Spec| {
        let mount = MountBuilder::default()
            .destination(container_path.clone())
            .typ("bind")
            .source(host_path)
            .options(vec![
                "bind".to_string(),
                "ro".to_string(),
                "rprivate".to_string(),
            ])
            .build()
            .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
        let mut mounts = spec.mounts().clone().unwrap_or_default();
        mounts.push(mount);
        spec.set_mounts(Some(mounts));

        let mut process = spec.process().clone().unwrap_or_default();
        let mut args = vec![
            container_path.display().to_string(),
            "--".to_string(),
        ];
        args.extend(process.args().clone().unwrap_or_default());
        process.set_args(Some(args));
        spec.set_process(Some(process));
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::options::ImageSource;

    fn opts_with_init(binary: &str) -> ContainerOptions {
        let mut o = ContainerOptions::new(
            ImageSource::Image("alpine".into()),
            PathBuf::from("/usr/bin/stevedore"),
        );
        o.init = true;
        o.init_binary = binary.to_string();
        o
    }

    #[test]
    fn test_disabled_is_noop() {
        let mut o = opts_with_init("/bin/no-such-init");
        o.init = false;
        let mut spec = Spec::default();
        let before = spec.mounts().clone();
        configure(&o).unwrap()(&mut spec).unwrap();
        assert_eq!(spec.mounts(), &before);
    }

    #[test]
    fn test_binds_and_prefixes_argv() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let init = tmp.path().join("tini");
        fs::write(&init, b"#!/bin/sh\n")?;
        fs::set_permissions(&init, fs::Permissions::from_mode(0o755))?;

        let o = opts_with_init(init.to_str().unwrap());
        let mut spec = Spec::default();
        let mut process = spec.process().clone().unwrap_or_default();
        process.set_args(Some(vec!["sleep".to_string(), "1".to_string()]));
        spec.set_process(Some(process));

        configure(&o).unwrap()(&mut spec).unwrap();

        let process = spec.process().as_ref().unwrap();
        assert_eq!(
            process.args().as_ref().unwrap(),
            &vec![
                "/sbin/tini".to_string(),
                "--".to_string(),
                "sleep".to_string(),
                "1".to_string()
            ]
        );
        let mount = spec
            .mounts()
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.destination() == Path::new("/sbin/tini"))
            .unwrap();
        assert!(mount
            .options()
            .as_ref()
            .unwrap()
            .contains(&"ro".to_string()));
        Ok(())
    }

    #[test]
    fn test_missing_binary_rejected() {
        let o = opts_with_init("no-such-init-binary-xyz");
        assert!(configure(&o).is_err());
    }
}
