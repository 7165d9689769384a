use clap::Parser;

/// Restart one or more containers
#[derive(Parser, Debug)]
pub struct Restart {
    /// Seconds to wait for the stop signal before sending SIGKILL
    #[clap(short, long)]
    pub time: Option<u32>,

    /// Container names, IDs, or ID prefixes
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub containers: Vec<String>,
}
