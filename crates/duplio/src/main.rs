// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Duplio - a real-time conversational digital-twin server.
//!
//! This is the binary entry point.

mod serve;

use clap::{Parser, Subcommand};

/// Duplio - a real-time conversational digital-twin server.
#[derive(Parser, Debug)]
#[command(name = "duplio", version, about, long_about = None)]
struct Cli {
    /// Path to a config file (overrides the XDG lookup).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Duplio conversation server.
    Serve,
    /// Generate a guest token for anonymous interactive use.
    Token,
    /// Validate the configuration file and print the resolved values.
    Config,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
            if let Err(e) = runtime.block_on(serve::run_serve(config)) {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Token => {
            println!("{}", duplio_gateway::generate_guest_token());
        }
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("error: failed to render config: {e}");
                std::process::exit(1);
            }
        },
    }
}

fn load_config(
    path: Option<&str>,
) -> Result<duplio_config::DuplioConfig, figment::Error> {
    match path {
        Some(path) => duplio_config::load_config_from_path(std::path::Path::new(path)),
        None => duplio_config::load_config(),
    }
}
