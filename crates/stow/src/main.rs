//! stow - put streams into a digest store and get them back out
//!
//! Subcommands:
//! - `stow ingest [FILE]` - Store FILE (or stdin), print its identification
//! - `stow cat <ID>` - Write a stored object to stdout
//! - `stow locate <ID>` - Print a stored object's file URL
//! - `stow list` - Print every identification in the store
//! - `stow exec -- <CMD> [ARGS..]` - Run a child with its stdio piped through ours

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "Content-addressed stream storage")]
#[command(version)]
struct Cli {
    /// TOML config file with a [store] section
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory (overrides config and environment)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Digest algorithm: sha1, sha256 or blake3
    #[arg(long, global = true)]
    hash: Option<String>,

    /// Print progress to stderr while ingesting
    #[arg(short, long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file or stdin and print its identification
    Ingest {
        /// File to store; stdin when omitted
        file: Option<PathBuf>,
    },

    /// Write a stored object to stdout
    Cat {
        /// Hex identification printed by `ingest`
        id: String,
    },

    /// Print the file URL of a stored object
    Locate {
        /// Hex identification printed by `ingest`
        id: String,
    },

    /// List every stored identification
    List,

    /// Run a command with its stdout, stderr and stdin piped through stow
    Exec {
        /// Program to run
        program: String,

        /// Arguments for the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout may carry binary objects; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Commands::Exec { program, args } = &cli.command {
        let code = commands::exec(program, args)?;
        io::stdout().flush()?;
        std::process::exit(code);
    }

    let config = commands::resolve_config(cli.config.as_deref(), cli.root, cli.hash.as_deref())?;
    let store = commands::open_store(config)?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Ingest { file } => {
            commands::ingest(&store, file.as_deref(), cli.progress, &mut stdout)?;
        }
        Commands::Cat { id } => {
            commands::cat(&store, &id, &mut stdout)?;
        }
        Commands::Locate { id } => {
            commands::locate(&store, &id, &mut stdout)?;
        }
        Commands::List => {
            commands::list(&store, &mut stdout)?;
        }
        Commands::Exec { .. } => unreachable!("handled above"),
    }

    stdout.flush()?;
    Ok(())
}
