mod cli;
mod commands;
mod config;
mod interrupt;
mod paths;
mod progress;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::LoadedConfig;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: LoadedConfig,
}

fn main() {
    if let Err(e) = run() {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
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
        .format_timestamp(None)
        .init();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "tdeploy", &mut io::stdout());
        return Ok(());
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: LoadedConfig::load(cli.config.as_deref())?,
    };

    match cli.command {
        Command::Validate { rules } => commands::validate::run(&ctx, rules.as_deref()),
        Command::Dag(selection) => commands::dag::run(&ctx, &selection),
        Command::Deploy(args) => commands::deploy::run(&ctx, &args),
        Command::Resume { id, run } => commands::resume::run(&ctx, id, &run),
        Command::Reconfigure {
            services,
            dry_run,
            run,
        } => commands::reconfigure::run(&ctx, &services, dry_run, &run),
        Command::Versions(cmd) => commands::versions::run(&ctx, cmd),
        Command::History { limit } => commands::history::list(&ctx, limit),
        Command::Show { id, json } => commands::history::show(&ctx, id, json),
        Command::Completions { .. } => Ok(()),
    }
}
