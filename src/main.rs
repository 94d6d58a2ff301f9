// src/main.rs
//! Npackd - CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "npackd")]
#[command(version)]
#[command(about = "Windows package manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reload all repositories and re-detect installed software
    Refresh,

    /// Search the package catalogue
    Search {
        /// Keywords, AND-combined
        keywords: Vec<String>,

        /// Only installed (or updateable) packages
        #[arg(long)]
        installed: bool,

        /// Only packages with a newer version available
        #[arg(long)]
        updateable: bool,
    },

    /// Print the installation path of a package version
    Path {
        /// Full package name
        package: String,

        /// Accepted version range, e.g. "[1.5, 2)"
        #[arg(long)]
        versions: String,
    },

    /// Show the operations an update would run
    PlanUpdate {
        /// Full package names
        packages: Vec<String>,
    },

    /// Manage repository URLs
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Export the catalogue as repository XML
    Export {
        /// Output file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a repository URL
    Add { url: String },
    /// List registered repositories
    List,
    /// Unregister a repository URL
    Remove { url: String },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Refresh => commands::cmd_refresh(),
        Commands::Search {
            keywords,
            installed,
            updateable,
        } => commands::cmd_search(&keywords, installed, updateable),
        Commands::Path { package, versions } => commands::cmd_path(&package, &versions),
        Commands::PlanUpdate { packages } => commands::cmd_plan_update(&packages),
        Commands::Repo { command } => match command {
            RepoCommands::Add { url } => commands::cmd_repo_add(&url),
            RepoCommands::List => commands::cmd_repo_list(),
            RepoCommands::Remove { url } => commands::cmd_repo_remove(&url),
        },
        Commands::Export { file } => commands::cmd_export(&file),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<npackd::Error>()
            .map(npackd::Error::exit_code)
            .unwrap_or(255);
        std::process::exit(code);
    }
}
