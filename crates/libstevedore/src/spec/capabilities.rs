//! Capability set computation for `--cap-add`, `--cap-drop` and
//! `--privileged`.

use std::str::FromStr;

use caps::Capability as CapsCapability;
use oci_spec::runtime::{
    Capabilities, Capability as SpecCapability, LinuxCapabilitiesBuilder, Spec,
};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::spec::SpecMutator;

/// The Docker-compatible default capability set.
const DEFAULT_CAPS: &[SpecCapability] = &[
    SpecCapability::AuditWrite,
    SpecCapability::Chown,
    SpecCapability::DacOverride,
    SpecCapability::Fowner,
    SpecCapability::Fsetid,
    SpecCapability::Kill,
    SpecCapability::Mknod,
    SpecCapability::NetBindService,
    SpecCapability::NetRaw,
    SpecCapability::Setfcap,
    SpecCapability::Setgid,
    SpecCapability::Setpcap,
    SpecCapability::Setuid,
    SpecCapability::SysChroot,
];

fn from_cap(c: CapsCapability) -> SpecCapability {
    match c {
        CapsCapability::CAP_AUDIT_CONTROL => SpecCapability::AuditControl,
        CapsCapability::CAP_AUDIT_READ => SpecCapability::AuditRead,
        CapsCapability::CAP_AUDIT_WRITE => SpecCapability::AuditWrite,
        CapsCapability::CAP_BLOCK_SUSPEND => SpecCapability::BlockSuspend,
        CapsCapability::CAP_BPF => SpecCapability::Bpf,
        CapsCapability::CAP_CHECKPOINT_RESTORE => SpecCapability::CheckpointRestore,
        CapsCapability::CAP_CHOWN => SpecCapability::Chown,
        CapsCapability::CAP_DAC_OVERRIDE => SpecCapability::DacOverride,
        CapsCapability::CAP_DAC_READ_SEARCH => SpecCapability::DacReadSearch,
        CapsCapability::CAP_FOWNER => SpecCapability::Fowner,
        CapsCapability::CAP_FSETID => SpecCapability::Fsetid,
        CapsCapability::CAP_IPC_LOCK => SpecCapability::IpcLock,
        CapsCapability::CAP_IPC_OWNER => SpecCapability::IpcOwner,
        CapsCapability::CAP_KILL => SpecCapability::Kill,
        CapsCapability::CAP_LEASE => SpecCapability::Lease,
        CapsCapability::CAP_LINUX_IMMUTABLE => SpecCapability::LinuxImmutable,
        CapsCapability::CAP_MAC_ADMIN => SpecCapability::MacAdmin,
        CapsCapability::CAP_MAC_OVERRIDE => SpecCapability::MacOverride,
        CapsCapability::CAP_MKNOD => SpecCapability::Mknod,
        CapsCapability::CAP_NET_ADMIN => SpecCapability::NetAdmin,
        CapsCapability::CAP_NET_BIND_SERVICE => SpecCapability::NetBindService,
        CapsCapability::CAP_NET_BROADCAST => SpecCapability::NetBroadcast,
        CapsCapability::CAP_NET_RAW => SpecCapability::NetRaw,
        CapsCapability::CAP_PERFMON => SpecCapability::Perfmon,
        CapsCapability::CAP_SETGID => SpecCapability::Setgid,
        CapsCapability::CAP_SETFCAP => SpecCapability::Setfcap,
        CapsCapability::CAP_SETPCAP => SpecCapability::Setpcap,
        CapsCapability::CAP_SETUID => SpecCapability::Setuid,
        CapsCapability::CAP_SYS_ADMIN => SpecCapability::SysAdmin,
        CapsCapability::CAP_SYS_BOOT => SpecCapability::SysBoot,
        CapsCapability::CAP_SYS_CHROOT => SpecCapability::SysChroot,
        CapsCapability::CAP_SYS_MODULE => SpecCapability::SysModule,
        CapsCapability::CAP_SYS_NICE => SpecCapability::SysNice,
        CapsCapability::CAP_SYS_PACCT => SpecCapability::SysPacct,
        CapsCapability::CAP_SYS_PTRACE => SpecCapability::SysPtrace,
        CapsCapability::CAP_SYS_RAWIO => SpecCapability::SysRawio,
        CapsCapability::CAP_SYS_RESOURCE => SpecCapability::SysResource,
        CapsCapability::CAP_SYS_TIME => SpecCapability::SysTime,
        CapsCapability::CAP_SYS_TTY_CONFIG => SpecCapability::SysTtyConfig,
        CapsCapability::CAP_SYSLOG => SpecCapability::Syslog,
        CapsCapability::CAP_WAKE_ALARM => SpecCapability::WakeAlarm,
        _ => unreachable!("invalid capability"),
    }
}

/// Accepts `NET_ADMIN`, `CAP_NET_ADMIN` or `net_admin`.
fn parse_cap(flag: &str) -> Result<SpecCapability> {
    let upper = flag.to_uppercase();
    let name = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    let cap = CapsCapability::from_str(&name)
        .map_err(|_| StevedoreError::InvalidInput(format!("unknown capability: {flag}")))?;
    Ok(from_cap(cap))
}

fn all_caps() -> Capabilities {
    caps::all().into_iter().map(from_cap).collect()
}

/// Computes the effective set: defaults plus `--cap-add` minus
/// `--cap-drop`, with `ALL` understood on both sides. `--privileged`
/// grants everything regardless.
pub fn effective_set(opts: &ContainerOptions) -> Result<Capabilities> {
    if opts.privileged {
        return Ok(all_caps());
    }

    let mut set: Capabilities = if opts.cap_add.iter().any(|c| c.eq_ignore_ascii_case("all")) {
        all_caps()
    } else {
        DEFAULT_CAPS.iter().copied().collect()
    };
    for flag in &opts.cap_add {
        if flag.eq_ignore_ascii_case("all") {
            continue;
        }
        set.insert(parse_cap(flag)?);
    }
    if opts.cap_drop.iter().any(|c| c.eq_ignore_ascii_case("all")) {
        set.clear();
        // adds win over drop ALL
        for flag in &opts.cap_add {
            if !flag.eq_ignore_ascii_case("all") {
                set.insert(parse_cap(flag)?);
            }
        }
    } else {
        for flag in &opts.cap_drop {
            set.remove(&parse_cap(flag)?);
        }
    }
    Ok(set)
}

pub fn configure(opts: &ContainerOptions) -> Result<SpecMutator> {
    let set = effective_set(opts)?;
    Ok(Box::new(move |spec: &mut Spec| {
        let capabilities = LinuxCapabilitiesBuilder::default()
            .bounding(set.clone())
            .effective(set.clone())
            .permitted(set)
            .build()
            .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
        let mut process = spec.process().clone().unwrap_or_default();
        process.set_capabilities(Some(capabilities));
        spec.set_process(Some(process));
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::options::ImageSource;

    fn opts() -> ContainerOptions {
        ContainerOptions::new(
            ImageSource::Image("alpine".into()),
            PathBuf::from("/usr/bin/stevedore"),
        )
    }

    #[test]
    fn test_default_set() {
        let set = effective_set(&opts()).unwrap();
        assert!(set.contains(&SpecCapability::Chown));
        assert!(!set.contains(&SpecCapability::SysAdmin));
    }

    #[test]
    fn test_cap_add_accepts_all_spellings() {
        for flag in ["NET_ADMIN", "CAP_NET_ADMIN", "net_admin"] {
            let mut o = opts();
            o.cap_add = vec![flag.to_string()];
            assert!(
                effective_set(&o).unwrap().contains(&SpecCapability::NetAdmin),
                "{flag}"
            );
        }
    }

    #[test]
    fn test_cap_drop() {
        let mut o = opts();
        o.cap_drop = vec!["NET_RAW".to_string()];
        assert!(!effective_set(&o).unwrap().contains(&SpecCapability::NetRaw));
    }

    #[test]
    fn test_drop_all_keeps_explicit_adds() {
        let mut o = opts();
        o.cap_drop = vec!["ALL".to_string()];
        o.cap_add = vec!["CHOWN".to_string()];
        let set = effective_set(&o).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&SpecCapability::Chown));
    }

    #[test]
    fn test_privileged_grants_everything() {
        let mut o = opts();
        o.privileged = true;
        let set = effective_set(&o).unwrap();
        assert!(set.contains(&SpecCapability::SysAdmin));
        assert!(set.contains(&SpecCapability::SysModule));
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let mut o = opts();
        o.cap_add = vec!["FLY".to_string()];
        assert!(effective_set(&o).is_err());
    }

    #[test]
    fn test_configure_sets_process_capabilities() {
        let mut spec = Spec::default();
        configure(&opts()).unwrap()(&mut spec).unwrap();
        let caps = spec
            .process()
            .as_ref()
            .unwrap()
            .capabilities()
            .as_ref()
            .unwrap();
        assert!(caps
            .bounding()
            .as_ref()
            .unwrap()
            .contains(&SpecCapability::Chown));
    }
}
