//! zap-cli library
//!
//! Command line front end for the Zap transfer crates.
//!
//! This library provides:
//! - `demo`: a complete transfer between two endpoints on an in-process
//!   broker, with per-file progress bars for both sides.
//! - `id`: generate a random endpoint id or normalise one typed by a user.
//! - `config`: the persisted default output directory.
//!
//! Configuration
//! - Stores the default output directory in
//!   $XDG_CONFIG_HOME/zap/config.toml or $HOME/.config/zap/config.toml if
//!   XDG_CONFIG_HOME is not set.
//!
//! Logging goes to stderr through `tracing-subscriber`. `RUST_LOG` overrides
//! the level; otherwise it is `warn`, or `debug` with `--verbose`.
//!
//! ```no_run
//! use zap_cli::{open_files, run_demo};
//! # async fn demo() -> anyhow::Result<()> {
//! let files = open_files(&["/tmp/a.bin".into()])?;
//! let report = run_demo(files, "/tmp/zap".into(), false).await?;
//! println!("{} failed", report.failed());
//! # Ok(())
//! # }
//! ```

mod config;
mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zap_core::EndpointId;

pub use config::{
    clear_default_output_dir, get_default_output_dir, resolve_output_dir,
    set_default_output_dir, suggested_default_output_dir,
};
pub use demo::{Demo, DemoReport, FileResult, open_files, run_demo};

#[derive(Parser, Debug)]
#[clap(name = "zap", version)]
#[clap(about = "Zap peer-to-peer file transfer tool", long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Demo(Demo),
    #[command(
        about = "Generate a random endpoint id, or normalise a given one"
    )]
    Id {
        #[clap(value_parser, help = "Id to check, case-insensitive")]
        id: Option<String>,
    },
    #[command(about = "Manage CLI configuration")]
    Config {
        #[clap(subcommand)]
        subcommand: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Show the current configuration")]
    Show,
    #[command(about = "Set the default output directory")]
    SetOutput {
        #[clap(value_parser, help = "Directory for received files")]
        dir: PathBuf,
    },
    #[command(about = "Clear the default output directory")]
    ClearOutput,
}

impl ConfigCommand {
    pub fn run(&self) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                match get_default_output_dir()? {
                    Some(dir) => println!("Default output directory: {dir}"),
                    None => println!(
                        "No default output directory set (using {})",
                        suggested_default_output_dir().display()
                    ),
                }
                Ok(())
            }
            ConfigCommand::SetOutput { dir } => {
                let dir = dir.display().to_string();
                set_default_output_dir(dir.clone()).with_context(|| {
                    "Failed to save default output directory"
                })?;
                println!("Default output directory set to: {dir}");
                Ok(())
            }
            ConfigCommand::ClearOutput => {
                clear_default_output_dir()?;
                println!("Default output directory cleared");
                Ok(())
            }
        }
    }
}

fn run_id(id: Option<&str>) -> Result<()> {
    let id = match id {
        Some(input) => EndpointId::parse_lenient(input)
            .with_context(|| format!("Invalid endpoint id: {input:?}"))?,
        None => EndpointId::random(),
    };
    println!("{id}");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parses the command line and runs the chosen command.
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Demo(demo) => {
            init_tracing(demo.verbose);
            demo.run().await
        }
        Commands::Id { id } => run_id(id.as_deref()),
        Commands::Config { subcommand } => subcommand.run(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_demo_arguments() {
        let cli = Cli::parse_from([
            "zap", "demo", "a.txt", "b.txt", "--out", "/tmp/x", "-v",
        ]);
        match cli.command {
            Commands::Demo(demo) => assert!(demo.verbose),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_config_subcommands() {
        let cli = Cli::parse_from(["zap", "config", "set-output", "/srv/in"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                subcommand: ConfigCommand::SetOutput { .. }
            }
        ));
    }
}
