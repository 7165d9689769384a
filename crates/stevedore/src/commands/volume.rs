use std::io::Write;

use anyhow::Result;
use libdocker_cli::{VolumeCmd, VolumeLs};
use tabwriter::TabWriter;

use crate::context::Context;

pub fn volume(ctx: &Context, cmd: VolumeCmd) -> Result<i32> {
    match cmd {
        VolumeCmd::Ls(ls) => list(ctx, ls),
    }
}

fn list(ctx: &Context, ls: VolumeLs) -> Result<i32> {
    let mut volumes = ctx.services.volumes.list()?;
    volumes.sort_by(|a, b| a.name.cmp(&b.name));

    if ls.quiet {
        for volume in volumes {
            println!("{}", volume.name);
        }
        return Ok(0);
    }

    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "VOLUME NAME\tMOUNTPOINT")?;
    for volume in volumes {
        writeln!(tw, "{}\t{}", volume.name, volume.mountpoint.display())?;
    }
    tw.flush()?;
    Ok(0)
}
