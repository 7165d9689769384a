use clap::Parser;

/// Manage volumes
#[derive(Parser, Debug)]
pub struct Volume {
    #[clap(subcommand)]
    pub command: VolumeCmd,
}

#[derive(Parser, Debug)]
pub enum VolumeCmd {
    Ls(VolumeLs),
}

/// List volumes
#[derive(Parser, Debug)]
pub struct VolumeLs {
    /// Only display volume names
    #[clap(short, long)]
    pub quiet: bool,
}
