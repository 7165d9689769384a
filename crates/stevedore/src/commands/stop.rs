use anyhow::Result;
use libdocker_cli::Stop;
use libstevedore::{container, task};

use crate::context::Context;

pub fn stop(ctx: &Context, cmd: Stop) -> Result<i32> {
    for needle in &cmd.containers {
        let container =
            container::resolve(&*ctx.services.containers, &ctx.names, &ctx.namespace, needle)?;
        task::stop_task(
            &ctx.services,
            &ctx.namespace,
            container.id(),
            &container.labels,
            cmd.time,
        )?;
        println!("{needle}");
    }
    Ok(0)
}
