//! # Stevedore
//!
//! A Docker-compatible command line for creating and running containers
//! against a containerd-style runtime service. This binary is a thin
//! dispatch layer: flag parsing lives in `libdocker-cli`, the actual
//! orchestration in `libstevedore`.

mod commands;
mod context;
mod observability;

use anyhow::Result;
use clap::{crate_version, Parser};
use libdocker_cli::{ContainerCmd, GlobalOpts, InternalCmd, ManagementCmd};

use crate::context::Context;

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    #[clap(flatten)]
    Container(ContainerCmd),
    #[clap(flatten)]
    Management(ManagementCmd),
}

fn main() {
    let opts = Opts::parse();

    if let Err(err) = observability::init(&opts.global) {
        eprintln!("log init failed: {err:?}");
    }
    tracing::debug!(args = ?std::env::args_os(), "invoked");

    match run(opts) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::debug!(?err, "command failed");
            eprintln!("stevedore: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Dispatches the parsed command. The returned value becomes the process
/// exit code; `run` propagates the task's own exit code.
fn run(opts: Opts) -> Result<i32> {
    let ctx = Context::open(&opts.global)?;

    match opts.subcmd {
        SubCommand::Container(cmd) => match cmd {
            ContainerCmd::Create(create) => commands::create::create(&ctx, create),
            ContainerCmd::Run(run) => commands::run::run(&ctx, run),
            ContainerCmd::Rm(rm) => commands::rm::rm(&ctx, rm),
            ContainerCmd::Kill(kill) => commands::kill::kill(&ctx, kill),
            ContainerCmd::Stop(stop) => commands::stop::stop(&ctx, stop),
            ContainerCmd::Restart(restart) => commands::restart::restart(&ctx, restart),
        },
        SubCommand::Management(cmd) => match cmd {
            ManagementCmd::Volume(volume) => commands::volume::volume(&ctx, volume),
            ManagementCmd::Internal(internal) => match internal.command {
                InternalCmd::OciHook(hook) => commands::internal::oci_hook(hook),
            },
        },
    }
}
