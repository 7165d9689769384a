//! Docker-style `-p/--publish` parsing and canonicalisation.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("invalid publish specification: {0}")]
    Invalid(String),
    #[error("invalid port number in \"{0}\": ports are 1-65535")]
    BadPort(String),
    #[error("invalid protocol \"{proto}\" in \"{flag}\": expected tcp, udp or sctp")]
    BadProtocol { flag: String, proto: String },
}

/// One canonical host/container port mapping. Serialised into the Ports
/// label with Docker-compatible field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(rename = "HostIP", default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: u16,
    #[serde(rename = "ContainerPort")]
    pub container_port: u16,
    #[serde(rename = "Protocol")]
    pub protocol: String,
}

/// Parses `[hostip:]hostport[:containerport][/proto]`. The container port
/// defaults to the host port; the protocol defaults to tcp.
pub fn parse(flag: &str) -> Result<PortMapping, PortError> {
    let (addr, protocol) = match flag.rsplit_once('/') {
        Some((addr, proto)) => (addr, proto.to_ascii_lowercase()),
        None => (flag, "tcp".to_string()),
    };
    if !matches!(protocol.as_str(), "tcp" | "udp" | "sctp") {
        return Err(PortError::BadProtocol {
            flag: flag.to_string(),
            proto: protocol,
        });
    }

    let parts: Vec<&str> = addr.split(':').collect();
    let (host_ip, host_port, container_port) = match parts.as_slice() {
        [host] => (String::new(), *host, *host),
        [first, second] => {
            if first.parse::<IpAddr>().is_ok() {
                (first.to_string(), *second, *second)
            } else {
                (String::new(), *first, *second)
            }
        }
        [ip, host, container] => {
            ip.parse::<IpAddr>()
                .map_err(|_| PortError::Invalid(flag.to_string()))?;
            (ip.to_string(), *host, *container)
        }
        _ => return Err(PortError::Invalid(flag.to_string())),
    };

    Ok(PortMapping {
        host_ip,
        host_port: parse_port(host_port)?,
        container_port: parse_port(container_port)?,
        protocol,
    })
}

fn parse_port(s: &str) -> Result<u16, PortError> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(PortError::BadPort(s.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Parses every `-p` flag and drops duplicates, preserving first-seen
/// order.
pub fn parse_all(flags: &[String]) -> Result<Vec<PortMapping>, PortError> {
    let mut out: Vec<PortMapping> = Vec::with_capacity(flags.len());
    for flag in flags {
        let mapping = parse(flag)?;
        if !out.contains(&mapping) {
            out.push(mapping);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            parse("8080").unwrap(),
            PortMapping {
                host_ip: String::new(),
                host_port: 8080,
                container_port: 8080,
                protocol: "tcp".into(),
            }
        );
        assert_eq!(
            parse("8080:80").unwrap(),
            PortMapping {
                host_ip: String::new(),
                host_port: 8080,
                container_port: 80,
                protocol: "tcp".into(),
            }
        );
        assert_eq!(
            parse("127.0.0.1:8080:80/tcp").unwrap(),
            PortMapping {
                host_ip: "127.0.0.1".into(),
                host_port: 8080,
                container_port: 80,
                protocol: "tcp".into(),
            }
        );
        // ip with defaulted container port
        assert_eq!(
            parse("127.0.0.1:53/udp").unwrap(),
            PortMapping {
                host_ip: "127.0.0.1".into(),
                host_port: 53,
                container_port: 53,
                protocol: "udp".into(),
            }
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert!(parse("").is_err());
        assert!(parse("0:80").is_err());
        assert!(parse("8080:0").is_err());
        assert!(parse("65536").is_err());
        assert!(parse("not-an-ip:80:80").is_err());
        assert!(parse("80/icmp").is_err());
    }

    #[test]
    fn test_dedupe_preserves_order() {
        let flags = vec![
            "8080:80".to_string(),
            "53/udp".to_string(),
            "8080:80/tcp".to_string(),
        ];
        let ports = parse_all(&flags).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].host_port, 8080);
        assert_eq!(ports[1].protocol, "udp");
    }

    #[test]
    fn test_round_trip() {
        let ports = parse_all(&["127.0.0.1:8080:80/tcp".to_string()]).unwrap();
        let json = serde_json::to_string(&ports).unwrap();
        assert_eq!(
            json,
            r#"[{"HostIP":"127.0.0.1","HostPort":8080,"ContainerPort":80,"Protocol":"tcp"}]"#
        );
        let back: Vec<PortMapping> = serde_json::from_str(&json).unwrap();
        assert_eq!(ports, back);
    }
}
