// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use mikrocloud::database::DatabaseKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mikrocloud")]
#[command(about = "Build and run application and database containers on Docker or Podman")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a mikrocloud.yml template into the current directory
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate configuration and probe the container engine
    Check,

    /// Build an image from a build request file
    Build {
        /// YAML file describing source, strategy, and target image
        file: PathBuf,
    },

    /// Print the default configuration for a database kind
    Defaults {
        /// postgresql, mysql, mariadb, redis, keydb, dragonfly, mongodb, clickhouse
        kind: DatabaseKind,
    },
}
