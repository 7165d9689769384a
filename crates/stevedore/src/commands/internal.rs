//! Hidden verbs invoked by stevedore itself. The OCI hook runs with the
//! state JSON on stdin and must never print to stdout: the low-level
//! runtime treats hook output as an error.

use std::io::Read;

use anyhow::{Context as _, Result};
use libdocker_cli::OciHook;
use libstevedore::network;

pub fn oci_hook(cmd: OciHook) -> Result<i32> {
    let mut state = String::new();
    std::io::stdin()
        .read_to_string(&mut state)
        .context("failed to read the OCI state from stdin")?;
    network::handle_hook_event(&cmd.event, &state)?;
    Ok(0)
}
