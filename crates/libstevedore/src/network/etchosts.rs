//! Allocation of the per-container `hosts` file inside the state directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::datastore::HOSTS_FILE;
use crate::error::{Result, StevedoreError};

/// The `--add-host` token that expands to the host-gateway address.
pub const HOST_GATEWAY_TOKEN: &str = "host-gateway";

/// Parses one `--add-host host:ip` entry. The special IP token
/// `host-gateway` is resolved against `host_gateway_ip`.
pub fn parse_add_host(flag: &str, host_gateway_ip: &str) -> Result<(String, String)> {
    let (host, ip) = flag.split_once(':').ok_or_else(|| {
        StevedoreError::InvalidInput(format!("--add-host must be host:ip, got \"{flag}\""))
    })?;
    if host.is_empty() || ip.is_empty() {
        return Err(StevedoreError::InvalidInput(format!(
            "--add-host must be host:ip, got \"{flag}\""
        )));
    }
    let ip = if ip == HOST_GATEWAY_TOKEN {
        host_gateway_ip.to_string()
    } else {
        ip.parse::<std::net::IpAddr>()
            .map_err(|_| {
                StevedoreError::InvalidInput(format!("invalid IP address in --add-host: {ip}"))
            })?
            .to_string()
    };
    Ok((host.to_string(), ip))
}

/// Renders the hosts file content: loopback boilerplate, the container's
/// own hostname, then the extra hosts in argv order.
pub fn render(hostname: Option<&str>, extra_hosts: &[(String, String)]) -> String {
    let mut out = String::from("127.0.0.1\tlocalhost\n::1\tlocalhost ip6-localhost ip6-loopback\n");
    if let Some(hostname) = hostname {
        out.push_str(&format!("127.0.1.1\t{hostname}\n"));
    }
    for (host, ip) in extra_hosts {
        out.push_str(&format!("{ip}\t{host}\n"));
    }
    out
}

/// Writes the hosts file into the state directory and returns its path.
pub fn allocate(
    state_dir: &Path,
    hostname: Option<&str>,
    extra_hosts: &[(String, String)],
) -> Result<PathBuf> {
    let path = state_dir.join(HOSTS_FILE);
    fs::write(&path, render(hostname, extra_hosts))?;
    Ok(path)
}

/// Removes an allocated hosts file; a missing file is success.
pub fn deallocate(state_dir: &Path) -> Result<()> {
    match fs::remove_file(state_dir.join(HOSTS_FILE)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_host() {
        assert_eq!(
            parse_add_host("db:10.0.0.5", "192.168.5.2").unwrap(),
            ("db".to_string(), "10.0.0.5".to_string())
        );
        assert_eq!(
            parse_add_host("gw:host-gateway", "192.168.5.2").unwrap(),
            ("gw".to_string(), "192.168.5.2".to_string())
        );
        assert!(parse_add_host("no-colon", "1.2.3.4").is_err());
        assert!(parse_add_host("db:", "1.2.3.4").is_err());
        assert!(parse_add_host("db:not-an-ip", "1.2.3.4").is_err());
    }

    #[test]
    fn test_allocate_and_deallocate() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let extra = vec![("db".to_string(), "10.0.0.5".to_string())];
        let path = allocate(tmp.path(), Some("web"), &extra)?;
        let content = fs::read_to_string(&path)?;
        assert!(content.contains("127.0.0.1\tlocalhost"));
        assert!(content.contains("127.0.1.1\tweb"));
        assert!(content.contains("10.0.0.5\tdb"));

        deallocate(tmp.path())?;
        assert!(!path.exists());
        deallocate(tmp.path())?; // idempotent
        Ok(())
    }
}
