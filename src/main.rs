mod cli;
mod cli_utils;
mod commands;
mod merger;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Each command loads its configuration and initializes logging itself,
    // since the log level may come from the config file
    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Render(args) => commands::render::run(&args),
        Commands::Quests(args) => commands::quests::run(args.command),
        Commands::Export(args) => commands::export::run(&args),
        Commands::Config(args) => commands::config::run(args.command),
    }
}
