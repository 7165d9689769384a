//! Restart policy parsing and the adapter to the runtime service's
//! restart supervisor.
//!
//! The supervisor itself lives runtime-side and is driven purely by
//! labels on the container record; our job is to write the right labels
//! at create time.

use std::collections::HashMap;

use crate::error::{Result, StevedoreError};

/// Label understood by the runtime-side restart supervisor.
pub const STATUS_LABEL: &str = "containerd.io/restart.status";
pub const POLICY_LABEL: &str = "containerd.io/restart.policy";
pub const LOG_URI_LABEL: &str = "containerd.io/restart.loguri";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    /// Restart on non-zero exit, up to the given count (0 = unlimited).
    OnFailure(u32),
    UnlessStopped,
}

impl RestartPolicy {
    pub fn parse(flag: &str) -> Result<Self> {
        let (policy, arg) = match flag.split_once(':') {
            Some((p, a)) => (p, Some(a)),
            None => (flag, None),
        };
        match (policy, arg) {
            ("" | "no", None) => Ok(RestartPolicy::No),
            ("always", None) => Ok(RestartPolicy::Always),
            ("unless-stopped", None) => Ok(RestartPolicy::UnlessStopped),
            ("on-failure", None) => Ok(RestartPolicy::OnFailure(0)),
            ("on-failure", Some(count)) => {
                let count = count.parse().map_err(|_| {
                    StevedoreError::InvalidInput(format!(
                        "invalid restart retry count: {count}"
                    ))
                })?;
                Ok(RestartPolicy::OnFailure(count))
            }
            _ => Err(StevedoreError::InvalidInput(format!(
                "invalid restart policy: {flag}"
            ))),
        }
    }

    fn policy_value(&self) -> Option<String> {
        match self {
            RestartPolicy::No => None,
            RestartPolicy::Always => Some("always".to_string()),
            RestartPolicy::OnFailure(0) => Some("on-failure".to_string()),
            RestartPolicy::OnFailure(n) => Some(format!("on-failure:{n}")),
            RestartPolicy::UnlessStopped => Some("unless-stopped".to_string()),
        }
    }

    /// Labels that enrol the container with the restart supervisor.
    /// `no` produces nothing, keeping the record out of the supervisor's
    /// watch set entirely.
    pub fn to_labels(&self, log_uri: Option<&str>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        if let Some(policy) = self.policy_value() {
            labels.insert(POLICY_LABEL.to_string(), policy);
            labels.insert(STATUS_LABEL.to_string(), "running".to_string());
            if let Some(uri) = log_uri {
                labels.insert(LOG_URI_LABEL.to_string(), uri.to_string());
            }
        }
        labels
    }
}
