use anyhow::Result;
use libdocker_cli::Restart;
use libstevedore::{container, task};

use crate::context::Context;

pub fn restart(ctx: &Context, cmd: Restart) -> Result<i32> {
    for needle in &cmd.containers {
        let container =
            container::resolve(&*ctx.services.containers, &ctx.names, &ctx.namespace, needle)?;
        task::restart_task(&ctx.services, &container, cmd.time)?;
        println!("{needle}");
    }
    Ok(0)
}
