//! Process entry: argv, environment, working directory, terminal and
//! user identity.

use oci_spec::runtime::{Spec, UserBuilder};

use crate::error::{Result, StevedoreError};
use crate::options::ContainerOptions;
use crate::runtime::ImageConfig;
use crate::spec::SpecMutator;

/// Final argv: the effective entrypoint followed by the user args, or by
/// the image CMD when no args were given. Overriding the entrypoint
/// discards the image CMD.
pub fn resolve_args(opts: &ContainerOptions, image: &ImageConfig) -> Result<Vec<String>> {
    let entrypoint = opts
        .entrypoint
        .clone()
        .unwrap_or_else(|| image.entrypoint.clone());
    let cmd = if !opts.args.is_empty() {
        opts.args.clone()
    } else if opts.entrypoint.is_some() {
        Vec::new()
    } else {
        image.cmd.clone()
    };

    let mut argv = entrypoint;
    argv.extend(cmd);
    if argv.is_empty() {
        return Err(StevedoreError::InvalidInput(
            "no command specified and the image declares none".to_string(),
        ));
    }
    Ok(argv)
}

fn parse_user(flag: &str) -> Result<(u32, u32)> {
    let invalid = || {
        StevedoreError::InvalidInput(format!(
            "invalid user {flag}: only numeric uid[:gid] is supported"
        ))
    };
    let (uid, gid) = match flag.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (flag, None),
    };
    let uid: u32 = uid.parse().map_err(|_| invalid())?;
    let gid: u32 = match gid {
        Some(g) => g.parse().map_err(|_| invalid())?,
        None => uid,
    };
    Ok((uid, gid))
}

pub fn configure(opts: &ContainerOptions, image: &ImageConfig) -> Result<SpecMutator> {
    let argv = resolve_args(opts, image)?;

    let mut env = image.env.clone();
    env.extend(opts.env.iter().cloned());
    if opts.tty && !env.iter().any(|e| e.starts_with("TERM=")) {
        env.push("TERM=xterm".to_string());
    }

    let cwd = opts
        .workdir
        .clone()
        .or_else(|| image.working_dir.clone())
        .unwrap_or_else(|| "/".to_string());

    let user = match &opts.user {
        Some(flag) => Some(parse_user(flag)?),
        None => None,
    };
    let umask = match &opts.umask {
        Some(flag) => Some(u32::from_str_radix(flag, 8).map_err(|_| {
            StevedoreError::InvalidInput(format!("invalid umask: {flag}"))
        })?),
        None => None,
    };
    let additional_gids = opts
        .group_add
        .iter()
        .map(|g| {
            g.parse::<u32>().map_err(|_| {
                StevedoreError::InvalidInput(format!(
                    "invalid group {g}: only numeric gids are supported"
                ))
            })
        })
        .collect::<Result<Vec<u32>>>()?;

    let tty = opts.tty;
    Ok(Box::new(move |spec: &mut Spec| {
        let mut process = spec.process().clone().unwrap_or_default();
        process.set_args(Some(argv));
        process.set_env(Some(env));
        process.set_cwd(cwd.into());
        process.set_terminal(Some(tty));

        if user.is_some() || umask.is_some() || !additional_gids.is_empty() {
            let (uid, gid) = user.unwrap_or((0, 0));
            let mut builder = UserBuilder::default().uid(uid).gid(gid);
            if let Some(umask) = umask {
                builder = builder.umask(umask);
            }
            if !additional_gids.is_empty() {
                builder = builder.additional_gids(additional_gids);
            }
            let user = builder
                .build()
                .map_err(|err| StevedoreError::InvalidInput(err.to_string()))?;
            process.set_user(user);
        }

        spec.set_process(Some(process));
        Ok(())
    }))
}
