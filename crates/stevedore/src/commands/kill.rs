use anyhow::Result;
use libdocker_cli::Kill;
use libstevedore::{container, task};

use crate::context::Context;

pub fn kill(ctx: &Context, cmd: Kill) -> Result<i32> {
    for needle in &cmd.containers {
        let container =
            container::resolve(&*ctx.services.containers, &ctx.names, &ctx.namespace, needle)?;
        task::kill_task(&ctx.services, &ctx.namespace, container.id(), &cmd.signal)?;
        println!("{needle}");
    }
    Ok(0)
}
