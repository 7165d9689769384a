//! Platform base specs and final per-platform fixups.
//!
//! Linux is the first-class target; FreeBSD and Windows produce reduced
//! specs for runtimes that understand them, with the Linux-only sections
//! stripped rather than gated out at compile time.

use std::path::Path;

use oci_spec::runtime::{MountBuilder, Spec};

use crate::error::{Result, StevedoreError};
use crate::options::Platform;

/// The starting spec every mutator operates on. All platforms start from
/// the stock OCI default; non-Linux fixups happen in [`finalize`] so the
/// mutators can assume the Linux shape throughout.
pub fn base(_platform: Platform) -> Result<Spec> {
    Ok(Spec::default())
}

/// Mounts that only exist on Linux.
const LINUX_ONLY_MOUNTS: &[&str] = &[
    "/proc",
    "/sys",
    "/sys/fs/cgroup",
    "/dev/pts",
    "/dev/shm",
    "/dev/mqueue",
];

pub fn finalize(platform: Platform, spec: &mut Spec) -> Result<()> {
    match platform {
        Platform::Linux => Ok(()),
        Platform::FreeBsd => {
            spec.set_linux(None);
            let mut mounts: Vec<_> = spec
                .mounts()
                .clone()
                .unwrap_or_default()
                .into_iter()
                .filter(|m| {
                    !LINUX_ONLY_MOUNTS
                        .iter()
                        .any(|p| m.destination() == Path::new(p))
                })
                .collect();
            // devfs replaces the Linux /dev tmpfs
            mounts.retain(|m| m.destination() != Path::new("/dev"));
            mounts.insert(
                0,
                MountBuilder::default()
                    .destination("/dev")
                    .typ("devfs")
                    .source("devfs")
                    .options(vec!["ruleset=4".to_string()])
                    .build()
                    .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?,
            );
            spec.set_mounts(Some(mounts));
            Ok(())
        }
        Platform::Windows => {
            // no linux section, no OCI hooks; network setup runs inline
            spec.set_linux(None);
            spec.set_hooks(None);
            spec.set_mounts(None);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_base_keeps_default_shape() {
        let mut spec = base(Platform::Linux).unwrap();
        finalize(Platform::Linux, &mut spec).unwrap();
        assert!(spec.linux().is_some());
        assert!(spec
            .mounts()
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.destination() == Path::new("/proc")));
    }

    #[test]
    fn test_freebsd_strips_linux_sections() {
        let mut spec = base(Platform::FreeBsd).unwrap();
        finalize(Platform::FreeBsd, &mut spec).unwrap();
        assert!(spec.linux().is_none());
        let mounts = spec.mounts().as_ref().unwrap();
        assert!(!mounts.iter().any(|m| m.destination() == Path::new("/proc")));
        assert_eq!(mounts[0].typ().as_deref(), Some("devfs"));
    }

    #[test]
    fn test_windows_drops_hooks() {
        let mut spec = base(Platform::Windows).unwrap();
        finalize(Platform::Windows, &mut spec).unwrap();
        assert!(spec.linux().is_none());
        assert!(spec.hooks().is_none());
    }
}
