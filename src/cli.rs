use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "nvup")]
#[command(author = "nvup contributors")]
#[command(version)]
#[command(about = "Unified CLI for NVIDIA driver and CUDA toolkit state on Debian", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Skip confirmations; escalate against a stuck package manager
    /// without asking
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the NVIDIA driver from a Debian repository channel
    Install(InstallArgs),

    /// Switch to the open-source nouveau driver
    Open,

    /// Remove the NVIDIA driver and restore distribution defaults
    Remove,

    /// Install the NVIDIA driver with the vendor .run installer
    Runfile(RunfileArgs),

    /// Install the CUDA toolkit from NVIDIA's apt repository
    Cuda,

    /// Show the probed system snapshot
    Status(StatusArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct InstallArgs {
    /// Repository channel to install from
    #[arg(long, value_enum, default_value_t = Channel::Stable)]
    pub channel: Channel,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Channel {
    /// The distribution's stable repository
    Stable,
    /// The backports release channel
    Backports,
}

#[derive(clap::Args)]
pub struct RunfileArgs {
    /// Pin an exact driver version instead of resolving the latest
    #[arg(long)]
    pub driver_version: Option<String>,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Output machine-readable JSON
    #[arg(long)]
    pub json: bool,
}
