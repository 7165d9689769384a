use clap::Parser;

/// Send a signal to one or more running containers
#[derive(Parser, Debug)]
pub struct Kill {
    /// Signal to send to the container
    #[clap(short, long, default_value = "KILL")]
    pub signal: String,

    /// Container names, IDs, or ID prefixes
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub containers: Vec<String>,
}
