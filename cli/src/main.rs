mod args;
mod event_loop;

use clap::Parser;
use log::error;

use args::{Cli, Config};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    };

    if let Err(err) = event_loop::run(config) {
        error!("{err}");
        std::process::exit(1);
    }
}
