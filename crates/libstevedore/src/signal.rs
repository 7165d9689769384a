//! Parses `--stop-signal` / `kill -s` values into *nix signals.

use std::str::FromStr;

use nix::sys::signal::Signal as NixSignal;

#[derive(Debug, thiserror::Error)]
#[error("invalid signal: {0}")]
pub struct InvalidSignal(String);

/// Accepts numbers ("9"), short names ("KILL") and full names ("SIGKILL"),
/// case-insensitively.
pub fn parse(value: &str) -> Result<NixSignal, InvalidSignal> {
    if let Ok(num) = value.parse::<i32>() {
        return NixSignal::try_from(num).map_err(|_| InvalidSignal(value.to_string()));
    }

    let mut name = value.to_ascii_uppercase();
    if !name.starts_with("SIG") {
        name.insert_str(0, "SIG");
    }
    NixSignal::from_str(&name).map_err(|_| InvalidSignal(value.to_string()))
}
