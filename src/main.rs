mod artifacts;
mod cli;
mod commands;
mod config;
mod download;
mod logfile;
mod privilege;
mod probe;
mod reconciler;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Channel, Cli, Commands};
use reconciler::DriverTarget;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub assume_yes: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logfile::open();

    // Initialize logging based on verbosity. Records that pass the
    // filter are mirrored into the transcript file.
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format(|buf, record| {
            use std::io::Write;
            logfile::append(&format!("[{}] {}", record.level(), record.args()));
            writeln!(buf, "[{}] {}", record.level(), record.args())
        })
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        assume_yes: cli.yes,
    };

    logfile::append(&format!(
        "nvup {} invoked: {}",
        env!("CARGO_PKG_VERSION"),
        std::env::args().skip(1).collect::<Vec<_>>().join(" ")
    ));

    match cli.command {
        None => commands::menu::run(&ctx),
        Some(Commands::Install(args)) => {
            let target = match args.channel {
                Channel::Stable => DriverTarget::StableRepo,
                Channel::Backports => DriverTarget::Backports,
            };
            commands::apply::run(&ctx, target)
        }
        Some(Commands::Open) => commands::apply::run(&ctx, DriverTarget::OpenSource),
        Some(Commands::Remove) => commands::apply::run(&ctx, DriverTarget::Removed),
        Some(Commands::Runfile(args)) => commands::apply::run(
            &ctx,
            DriverTarget::RunInstaller {
                version: args.driver_version,
            },
        ),
        Some(Commands::Cuda) => commands::apply::run(&ctx, DriverTarget::CudaToolkit),
        Some(Commands::Status(args)) => commands::status::run(&ctx, args.json),
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "nvup", &mut io::stdout());
            Ok(())
        }
    }
}
