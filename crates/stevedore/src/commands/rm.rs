//! Handles `rm`. Arguments are processed in argv order; the first
//! failure aborts the remaining ones.

use anyhow::Result;
use libdocker_cli::Rm;
use libstevedore::remove::{remove_container, RemoveOptions};

use crate::context::Context;

pub fn rm(ctx: &Context, cmd: Rm) -> Result<i32> {
    let opts = RemoveOptions {
        force: cmd.force,
        volumes: cmd.volumes,
    };
    for needle in &cmd.containers {
        remove_container(
            &ctx.services,
            &ctx.store,
            &ctx.names,
            &ctx.namespace,
            needle,
            opts,
        )?;
        println!("{needle}");
    }
    Ok(0)
}
