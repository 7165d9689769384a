//! Hidden verbs invoked by stevedore itself, never by users.
use clap::Parser;

/// Internal subcommands (hidden from help)
#[derive(Parser, Debug)]
pub struct Internal {
    #[clap(subcommand)]
    pub command: InternalCmd,
}

#[derive(Parser, Debug)]
pub enum InternalCmd {
    OciHook(OciHook),
}

/// OCI hook entry point. The low-level runtime executes
/// `stevedore <global flags> internal oci-hook <event>` with the OCI state
/// JSON on stdin; the hook performs CNI ADD/DEL for the container.
#[derive(Parser, Debug)]
pub struct OciHook {
    /// Lifecycle event (createRuntime, postStop)
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub event: String,
}
