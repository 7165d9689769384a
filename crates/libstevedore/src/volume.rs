//! Parsing of `-v/--volume`, `--mount` and `--tmpfs` into mount requests,
//! and the collaborator seam for the volume catalog.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("invalid volume specification: {0}")]
    InvalidVolume(String),
    #[error("invalid mount specification: {0}")]
    InvalidMount(String),
    #[error("invalid tmpfs specification: {0}")]
    InvalidTmpfs(String),
    #[error("mount destination must be an absolute path: {0}")]
    RelativeDestination(String),
}

/// Where the data of a requested mount comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// A named volume from the volume catalog.
    Volume(String),
    /// A volume created implicitly because `-v` named no source. Its
    /// generated name follows the container in the anonymous-volume set.
    Anonymous,
    /// A host path bind mount.
    Bind(PathBuf),
    /// A fresh tmpfs.
    Tmpfs,
}

/// One user-requested mount, in argv order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: MountSource,
    pub destination: PathBuf,
    /// Raw option tokens (ro, rw, propagation modes, tmpfs options).
    pub options: Vec<String>,
}

impl MountRequest {
    pub fn read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// Docker-compatible description of an applied mount, persisted in the
/// mount-points label so `rm` and inspection can recover it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "Mode", default)]
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
    #[serde(rename = "Propagation", default)]
    pub propagation: String,
}

/// Parses a `-v/--volume` flag: `dst`, `src:dst`, or `src:dst:opts`.
/// A source starting with `/`, `./` or `~` is a host path; anything else
/// names a volume. A lone destination requests an anonymous volume.
pub fn parse_volume_flag(flag: &str) -> Result<MountRequest, MountError> {
    if flag.is_empty() {
        return Err(MountError::InvalidVolume(flag.to_string()));
    }
    let parts: Vec<&str> = flag.split(':').collect();
    let (source, destination, options) = match parts.len() {
        1 => (None, parts[0], Vec::new()),
        2 => (Some(parts[0]), parts[1], Vec::new()),
        3 => (
            Some(parts[0]),
            parts[1],
            parts[2].split(',').map(str::to_string).collect(),
        ),
        _ => return Err(MountError::InvalidVolume(flag.to_string())),
    };

    let destination = absolute_destination(destination)?;
    let source = match source {
        None => MountSource::Anonymous,
        Some("") => return Err(MountError::InvalidVolume(flag.to_string())),
        Some(src) if is_host_path(src) => MountSource::Bind(PathBuf::from(src)),
        Some(src) => MountSource::Volume(src.to_string()),
    };

    Ok(MountRequest {
        source,
        destination,
        options,
    })
}

/// Parses a `--mount` flag: CSV of `type=`, `source=`/`src=`,
/// `destination=`/`dst=`/`target=`, `readonly`, `bind-propagation=`,
/// `tmpfs-size=`, `tmpfs-mode=`.
pub fn parse_mount_flag(flag: &str) -> Result<MountRequest, MountError> {
    let mut kind = "volume".to_string();
    let mut source: Option<String> = None;
    let mut destination: Option<String> = None;
    let mut options = Vec::new();

    for field in flag.split(',') {
        let (key, value) = match field.split_once('=') {
            Some((k, v)) => (k, v),
            None => (field, ""),
        };
        match key {
            "type" => kind = value.to_string(),
            "source" | "src" => source = Some(value.to_string()),
            "destination" | "dst" | "target" => destination = Some(value.to_string()),
            "readonly" | "ro" => options.push("ro".to_string()),
            "bind-propagation" => options.push(value.to_string()),
            "tmpfs-size" => options.push(format!("size={value}")),
            "tmpfs-mode" => options.push(format!("mode={value}")),
            "" => continue,
            _ => return Err(MountError::InvalidMount(format!("unknown field {key}"))),
        }
    }

    let destination = destination.ok_or_else(|| {
        MountError::InvalidMount(format!("missing destination in \"{flag}\""))
    })?;
    let destination = absolute_destination(&destination)?;

    let source = match (kind.as_str(), source) {
        ("bind", Some(src)) => MountSource::Bind(PathBuf::from(src)),
        ("bind", None) => {
            return Err(MountError::InvalidMount(format!(
                "bind mount requires a source in \"{flag}\""
            )))
        }
        ("volume", Some(src)) => MountSource::Volume(src),
        ("volume", None) => MountSource::Anonymous,
        ("tmpfs", _) => MountSource::Tmpfs,
        (other, _) => {
            return Err(MountError::InvalidMount(format!("unknown mount type {other}")))
        }
    };

    Ok(MountRequest {
        source,
        destination,
        options,
    })
}

/// Parses a `--tmpfs` flag: `dst` or `dst:opts`.
pub fn parse_tmpfs_flag(flag: &str) -> Result<MountRequest, MountError> {
    let (destination, options) = match flag.split_once(':') {
        Some((dst, opts)) => (dst, opts.split(',').map(str::to_string).collect()),
        None => (flag, Vec::new()),
    };
    if destination.is_empty() {
        return Err(MountError::InvalidTmpfs(flag.to_string()));
    }
    let destination = absolute_destination(destination)?;
    Ok(MountRequest {
        source: MountSource::Tmpfs,
        destination,
        options,
    })
}

fn absolute_destination(dst: &str) -> Result<PathBuf, MountError> {
    let path = PathBuf::from(dst);
    if !path.is_absolute() {
        return Err(MountError::RelativeDestination(dst.to_string()));
    }
    Ok(path)
}

fn is_host_path(src: &str) -> bool {
    src.starts_with('/') || src.starts_with("./") || src.starts_with("../") || src.starts_with('~')
}

/// Generated name for an anonymous volume: a fresh 64-hex identifier, the
/// same shape as container IDs.
pub fn anonymous_volume_name() -> String {
    crate::idgen::generate()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_volume_flag_forms() {
        let anon = parse_volume_flag("/data").unwrap();
        assert_eq!(anon.source, MountSource::Anonymous);
        assert_eq!(anon.destination, Path::new("/data"));

        let named = parse_volume_flag("db:/var/lib/db:ro").unwrap();
        assert_eq!(named.source, MountSource::Volume("db".into()));
        assert!(named.read_only());

        let bind = parse_volume_flag("/src:/dst").unwrap();
        assert_eq!(bind.source, MountSource::Bind("/src".into()));
        assert!(!bind.read_only());
    }

    #[test]
    fn test_volume_flag_rejects() {
        assert!(parse_volume_flag("").is_err());
        assert!(parse_volume_flag("a:b:c:d").is_err());
        assert!(parse_volume_flag("vol:relative/path").is_err());
        assert!(parse_volume_flag(":/data").is_err());
    }

    #[test]
    fn test_mount_flag() {
        let m = parse_mount_flag("type=bind,source=/src,target=/dst,readonly").unwrap();
        assert_eq!(m.source, MountSource::Bind("/src".into()));
        assert_eq!(m.destination, Path::new("/dst"));
        assert!(m.read_only());

        let m = parse_mount_flag("type=tmpfs,destination=/run,tmpfs-size=64m").unwrap();
        assert_eq!(m.source, MountSource::Tmpfs);
        assert!(m.options.contains(&"size=64m".to_string()));

        let m = parse_mount_flag("dst=/data").unwrap();
        assert_eq!(m.source, MountSource::Anonymous);
    }

    #[test]
    fn test_mount_flag_rejects() {
        assert!(parse_mount_flag("type=bind,target=/dst").is_err());
        assert!(parse_mount_flag("type=volume").is_err());
        assert!(parse_mount_flag("type=squashfs,target=/x").is_err());
        assert!(parse_mount_flag("type=bind,src=/a,dst=/b,frobnicate=yes").is_err());
    }

    #[test]
    fn test_tmpfs_flag() {
        let m = parse_tmpfs_flag("/tmp:rw,size=16m").unwrap();
        assert_eq!(m.source, MountSource::Tmpfs);
        assert_eq!(m.options, vec!["rw".to_string(), "size=16m".to_string()]);
        assert!(parse_tmpfs_flag("").is_err());
        assert!(parse_tmpfs_flag("relative").is_err());
    }

    #[test]
    fn test_mount_point_round_trip() {
        let mp = MountPoint {
            kind: "volume".into(),
            name: Some("db".into()),
            source: "/var/lib/stevedore/volumes/db/_data".into(),
            destination: "/var/lib/db".into(),
            mode: "ro".into(),
            rw: false,
            propagation: String::new(),
        };
        let json = serde_json::to_string(&mp).unwrap();
        let back: MountPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(mp, back);
    }
}
