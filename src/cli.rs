//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::role::Role;

#[derive(Parser)]
#[command(
    name = "neurobridge",
    version,
    about = "Bidirectional RPC bridge between a neuronal simulator and a 3D visualization tool",
    long_about = None
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "NEUROBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a bridge node until interrupted
    Run {
        /// Role to serve as: NEURON or Blender
        #[arg(short, long, value_parser = parse_role)]
        role: Role,
    },

    /// Submit one command to a serving end and print its result
    Exec {
        /// End to submit to: NEURON or Blender
        #[arg(short, long, value_parser = parse_role)]
        end: Role,

        /// Command text (statements separated by ';')
        command: String,

        /// Enqueue and print the task id instead of waiting for the result
        #[arg(long)]
        no_wait: bool,
    },

    /// Ask a serving end to stop
    Stop {
        /// End to stop: NEURON or Blender
        #[arg(short, long, value_parser = parse_role)]
        end: Role,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(default_value = "neurobridge.toml")]
        path: PathBuf,
    },
}

fn parse_role(s: &str) -> std::result::Result<Role, String> {
    s.parse().map_err(|e: crate::error::Error| e.to_string())
}
