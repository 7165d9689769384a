//! Generation of the per-container `resolv.conf` for CNI-managed networks.

use std::fs;
use std::path::{Path, PathBuf};

use crate::datastore::RESOLV_CONF;
use crate::error::Result;

/// Used when neither `--dns` nor a usable host resolv.conf is available.
const FALLBACK_NAMESERVERS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

pub fn render(nameservers: &[String], searches: &[String], options: &[String]) -> String {
    let mut out = String::new();
    for ns in nameservers {
        out.push_str(&format!("nameserver {ns}\n"));
    }
    if !searches.is_empty() {
        out.push_str(&format!("search {}\n", searches.join(" ")));
    }
    if !options.is_empty() {
        out.push_str(&format!("options {}\n", options.join(" ")));
    }
    out
}

/// Nameservers to use when the user gave none: the host's resolv.conf
/// minus loopback resolvers (which are unreachable from the container's
/// network namespace), falling back to well-known public resolvers.
pub fn default_nameservers(host_resolv_conf: &Path) -> Vec<String> {
    let mut servers = Vec::new();
    if let Ok(content) = fs::read_to_string(host_resolv_conf) {
        for line in content.lines() {
            let line = line.trim();
            if let Some(addr) = line.strip_prefix("nameserver ") {
                let addr = addr.trim();
                if addr.starts_with("127.") || addr == "::1" {
                    continue;
                }
                servers.push(addr.to_string());
            }
        }
    }
    if servers.is_empty() {
        servers = FALLBACK_NAMESERVERS.iter().map(|s| s.to_string()).collect();
    }
    servers
}

/// Writes `resolv.conf` into the state directory and returns its path.
pub fn allocate(
    state_dir: &Path,
    dns: &[String],
    searches: &[String],
    options: &[String],
) -> Result<PathBuf> {
    let nameservers = if dns.is_empty() {
        default_nameservers(Path::new("/etc/resolv.conf"))
    } else {
        dns.to_vec()
    };
    let path = state_dir.join(RESOLV_CONF);
    fs::write(&path, render(&nameservers, searches, options))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let content = render(
            &["10.0.0.1".into(), "10.0.0.2".into()],
            &["corp.example".into()],
            &["ndots:1".into()],
        );
        assert_eq!(
            content,
            "nameserver 10.0.0.1\nnameserver 10.0.0.2\nsearch corp.example\noptions ndots:1\n"
        );
    }

    #[test]
    fn test_default_nameservers_filters_loopback() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let host = tmp.path().join("resolv.conf");
        fs::write(&host, "nameserver 127.0.0.53\nnameserver 1.1.1.1\n")?;
        assert_eq!(default_nameservers(&host), vec!["1.1.1.1".to_string()]);

        fs::write(&host, "nameserver 127.0.0.53\n")?;
        assert_eq!(
            default_nameservers(&host),
            vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_allocate_writes_state_dir() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = allocate(tmp.path(), &["10.1.1.1".into()], &[], &[])?;
        assert!(path.ends_with("resolv.conf"));
        assert_eq!(fs::read_to_string(path)?, "nameserver 10.1.1.1\n");
        Ok(())
    }
}
