mod cli;
mod config;
mod core;
mod error;
mod models;
mod sources;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = cli::run(cli) {
        eprintln!("Ошибка: {:#}", e);
        std::process::exit(1);
    }
}
