//! The internal label map.
//!
//! Everything the orchestrator must recover after its own process exits is
//! serialised into the container record's labels: JSON fields use compact
//! encoding, deserialisation is the exact inverse, and a missing label is
//! an absent feature, never a zero value. These labels are the
//! authoritative source of truth for non-runtime metadata.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::network::ports::PortMapping;
use crate::volume::MountPoint;

pub const NAMESPACE: &str = "stevedore/namespace";
pub const NAME: &str = "stevedore/name";
pub const HOSTNAME: &str = "stevedore/hostname";
pub const EXTRA_HOSTS: &str = "stevedore/extraHosts";
pub const STATE_DIR: &str = "stevedore/state-dir";
pub const NETWORKS: &str = "stevedore/networks";
pub const PORTS: &str = "stevedore/ports";
pub const LOG_URI: &str = "stevedore/log-uri";
pub const ANONYMOUS_VOLUMES: &str = "stevedore/anonymous-volumes";
pub const PID_FILE: &str = "stevedore/pid-file";
pub const IP_ADDRESS: &str = "stevedore/ip";
pub const MOUNT_POINTS: &str = "stevedore/mount-points";
pub const MAC_ADDRESS: &str = "stevedore/mac-address";
pub const PID_CONTAINER: &str = "stevedore/pid-container";
pub const STOP_SIGNAL: &str = "stevedore/stop-signal";
pub const STOP_TIMEOUT: &str = "stevedore/stop-timeout";
pub const PLATFORM: &str = "stevedore/platform";
/// Written post-hoc when the container was created but a later step
/// failed; kept for post-mortem diagnosis of the doomed record.
pub const ERROR: &str = "stevedore/error";

/// Decoded form of the internal label map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerLabels {
    pub namespace: String,
    pub name: Option<String>,
    pub hostname: Option<String>,
    /// `host:ip` entries, already resolved.
    pub extra_hosts: Vec<String>,
    pub state_dir: Option<PathBuf>,
    pub networks: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub log_uri: Option<String>,
    pub anonymous_volumes: Vec<String>,
    pub pid_file: Option<PathBuf>,
    pub ip_address: Option<String>,
    pub mount_points: Vec<MountPoint>,
    pub mac_address: Option<String>,
    pub pid_container: Option<String>,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<u32>,
    pub platform: Option<String>,
    pub error: Option<String>,
}

impl ContainerLabels {
    /// Serialises into record labels. JSON fields are compact; empty
    /// collections and `None` produce no label at all.
    pub fn to_map(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        map.insert(NAMESPACE.to_string(), self.namespace.clone());

        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        put(NAME, self.name.clone());
        put(HOSTNAME, self.hostname.clone());
        if !self.extra_hosts.is_empty() {
            put(EXTRA_HOSTS, Some(serde_json::to_string(&self.extra_hosts)?));
        }
        put(
            STATE_DIR,
            self.state_dir.as_ref().map(|p| p.display().to_string()),
        );
        if !self.networks.is_empty() {
            put(NETWORKS, Some(serde_json::to_string(&self.networks)?));
        }
        if !self.ports.is_empty() {
            put(PORTS, Some(serde_json::to_string(&self.ports)?));
        }
        put(LOG_URI, self.log_uri.clone());
        if !self.anonymous_volumes.is_empty() {
            put(
                ANONYMOUS_VOLUMES,
                Some(serde_json::to_string(&self.anonymous_volumes)?),
            );
        }
        put(
            PID_FILE,
            self.pid_file.as_ref().map(|p| p.display().to_string()),
        );
        put(IP_ADDRESS, self.ip_address.clone());
        if !self.mount_points.is_empty() {
            put(
                MOUNT_POINTS,
                Some(serde_json::to_string(&self.mount_points)?),
            );
        }
        put(MAC_ADDRESS, self.mac_address.clone());
        put(PID_CONTAINER, self.pid_container.clone());
        put(STOP_SIGNAL, self.stop_signal.clone());
        put(STOP_TIMEOUT, self.stop_timeout.map(|t| t.to_string()));
        put(PLATFORM, self.platform.clone());
        put(ERROR, self.error.clone());

        Ok(map)
    }

    /// Exact inverse of [`to_map`](Self::to_map).
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        fn json<T: serde::de::DeserializeOwned + Default>(
            map: &HashMap<String, String>,
            key: &str,
        ) -> Result<T> {
            match map.get(key) {
                Some(raw) => Ok(serde_json::from_str(raw)?),
                None => Ok(T::default()),
            }
        }

        Ok(Self {
            namespace: map.get(NAMESPACE).cloned().unwrap_or_default(),
            name: map.get(NAME).cloned(),
            hostname: map.get(HOSTNAME).cloned(),
            extra_hosts: json(map, EXTRA_HOSTS)?,
            state_dir: map.get(STATE_DIR).map(PathBuf::from),
            networks: json(map, NETWORKS)?,
            ports: json(map, PORTS)?,
            log_uri: map.get(LOG_URI).cloned(),
            anonymous_volumes: json(map, ANONYMOUS_VOLUMES)?,
            pid_file: map.get(PID_FILE).map(PathBuf::from),
            ip_address: map.get(IP_ADDRESS).cloned(),
            mount_points: json(map, MOUNT_POINTS)?,
            mac_address: map.get(MAC_ADDRESS).cloned(),
            pid_container: map.get(PID_CONTAINER).cloned(),
            stop_signal: map.get(STOP_SIGNAL).cloned(),
            stop_timeout: map
                .get(STOP_TIMEOUT)
                .and_then(|t| t.parse().ok()),
            platform: map.get(PLATFORM).cloned(),
            error: map.get(ERROR).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ports;

    fn sample() -> ContainerLabels {
        ContainerLabels {
            namespace: "default".into(),
            name: Some("web".into()),
            hostname: Some("web".into()),
            extra_hosts: vec!["db:10.0.0.5".into()],
            state_dir: Some(PathBuf::from("/var/lib/stevedore/containers/default/abc")),
            networks: vec!["bridge".into()],
            ports: ports::parse_all(&["127.0.0.1:8080:80/tcp".into()]).unwrap(),
            log_uri: Some("binary:///usr/bin/stevedore?driver=json-file".into()),
            anonymous_volumes: vec!["a".repeat(64)],
            pid_file: Some(PathBuf::from("/run/web.pid")),
            ip_address: Some("10.4.0.2".into()),
            mount_points: vec![MountPoint {
                kind: "bind".into(),
                name: None,
                source: "/src".into(),
                destination: "/dst".into(),
                mode: String::new(),
                rw: true,
                propagation: String::new(),
            }],
            mac_address: Some("02:42:ac:11:00:02".into()),
            pid_container: Some("f".repeat(64)),
            stop_signal: Some("SIGTERM".into()),
            stop_timeout: Some(10),
            platform: Some("linux/amd64".into()),
            error: None,
        }
    }

    #[test]
    fn test_round_trip_is_identity() {
        let labels = sample();
        let map = labels.to_map().unwrap();
        assert_eq!(ContainerLabels::from_map(&map).unwrap(), labels);
    }

    #[test]
    fn test_missing_labels_are_absent_features() {
        let map = HashMap::from([(NAMESPACE.to_string(), "default".to_string())]);
        let labels = ContainerLabels::from_map(&map).unwrap();
        assert_eq!(labels.namespace, "default");
        assert!(labels.name.is_none());
        assert!(labels.ports.is_empty());
        assert!(labels.stop_timeout.is_none());
    }

    #[test]
    fn test_empty_collections_not_serialised() {
        let labels = ContainerLabels {
            namespace: "default".into(),
            ..Default::default()
        };
        let map = labels.to_map().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(NAMESPACE));
    }

    #[test]
    fn test_ports_label_shape() {
        let map = sample().to_map().unwrap();
        assert_eq!(
            map[PORTS],
            r#"[{"HostIP":"127.0.0.1","HostPort":8080,"ContainerPort":80,"Protocol":"tcp"}]"#
        );
    }
}
