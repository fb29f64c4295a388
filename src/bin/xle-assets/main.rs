//! xle-assets CLI tool
//!
//! Command-line access to search rule resolution, for checking how an asset name resolves
//! against a set of search directories.
//!
//! ## Commands
//!
//! - `resolve <name>...`: Resolve file names
//! - `resolve-dir <name>...`: Resolve directory names
//! - `find <pattern>`: List files matching a wildcard in every search directory
//!
//! Search directories come from `--dir` (repeatable) followed by the `[search]` section of
//! the config file given with `--config`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xle_assets::{config::AssetsConfig, paths::DirectorySearchRules};

#[derive(Parser)]
#[command(name = "xle-assets")]
#[command(author, version, about = "Resolve asset names against search directories", long_about = None)]
struct Cli {
    /// Search directory, probed in the order given (repeatable)
    #[arg(short, long = "dir", global = true)]
    dirs: Vec<String>,

    /// Base file; its folder is searched first and `<.>` resolves to it
    #[arg(short, long, global = true)]
    base_file: Option<String>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one or more file names
    Resolve {
        /// Names to resolve, optionally with a `:parameters` suffix
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Resolve one or more directory names
    ResolveDir {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List files matching a `*`/`?` wildcard in every search directory
    Find {
        pattern: String,
    },
}

fn build_rules(cli: &Cli) -> Result<DirectorySearchRules, Box<dyn std::error::Error>> {
    let mut rules = DirectorySearchRules::new();
    if let Some(base_file) = &cli.base_file {
        rules.add_search_directory_from_filename(base_file);
        rules.set_base_file(base_file);
    }
    for dir in cli.dirs.iter() {
        rules.add_search_directory(dir);
    }
    if let Some(path) = &cli.config {
        let config = AssetsConfig::load(path)?;
        rules.merge(&config.search_rules());
        if rules.base_file().is_none() {
            if let Some(base_file) = &config.search.base_file {
                rules.set_base_file(base_file);
            }
        }
    }
    tracing::debug!("Search directories: {:?}", rules.directories().collect::<Vec<_>>());
    Ok(rules)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rules = build_rules(&cli)?;

    if rules.is_empty() {
        eprintln!("Warning: no search directories; only literal names will resolve");
    }

    match &cli.command {
        Commands::Resolve { names } => {
            for name in names {
                println!("{}", rules.resolve_file(name));
            }
        }
        Commands::ResolveDir { names } => {
            for name in names {
                println!("{}", rules.resolve_directory(name));
            }
        }
        Commands::Find { pattern } => {
            let matches = rules.find_files(pattern);
            if matches.is_empty() {
                eprintln!("No files match {pattern}");
                std::process::exit(1);
            }
            for path in matches {
                println!("{path}");
            }
        }
    }

    Ok(())
}
