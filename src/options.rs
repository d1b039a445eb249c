use clap::{Parser, Subcommand};

/// Eversolar PMU bridge
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Poll the PMU on the configured interval until interrupted (default)
    Monitor,
    /// Poll once and print the decoded reading as JSON
    Poll,
    /// Push the host clock to the PMU once
    SyncTime,
    /// Check that the PMU answers the init handshake
    TestConnection,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
