use clap::Parser;

/// Remove one or more containers
#[derive(Parser, Debug)]
pub struct Rm {
    /// Force the removal of a running container (uses SIGKILL)
    #[clap(short, long)]
    pub force: bool,
    /// Remove anonymous volumes associated with the container
    #[clap(short, long)]
    pub volumes: bool,

    /// Container names, IDs, or ID prefixes
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub containers: Vec<String>,
}
