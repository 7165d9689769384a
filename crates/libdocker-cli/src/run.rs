//! Handles `run`: create a container and immediately start its task.
use clap::Parser;

use crate::CreateOptions;

/// Run a command in a new container
// -h belongs to --hostname here, so help is long-only
#[derive(Parser, Debug)]
#[clap(disable_help_flag = true)]
pub struct Run {
    /// Print help
    #[clap(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,

    /// Run the container in the background and print its ID
    #[clap(short, long)]
    pub detach: bool,
    /// Override the key sequence for detaching a container
    #[clap(long, default_value = "ctrl-p,ctrl-q")]
    pub detach_keys: String,

    #[clap(flatten)]
    pub options: CreateOptions,

    /// Image reference, or a rootfs path when --rootfs is given
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub image: String,

    /// Command and arguments to run inside the container
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
