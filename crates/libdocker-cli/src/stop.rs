use clap::Parser;

/// Stop one or more running containers
#[derive(Parser, Debug)]
pub struct Stop {
    /// Seconds to wait for the stop signal before sending SIGKILL
    #[clap(short, long)]
    pub time: Option<u32>,

    /// Container names, IDs, or ID prefixes
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub containers: Vec<String>,
}
