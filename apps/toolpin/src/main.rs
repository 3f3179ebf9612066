#![warn(clippy::pedantic)]

//! # toolpin
//!
//! Command-line front end for the toolchain engine. It resolves which
//! compiler version a project needs, installs it from the signed release
//! index, and manages the installed set.
//!
//! ## Subcommands
//!
//! - `install` - Resolve and install the project's toolchain
//! - `use` - Use an existing executable instead of a managed install
//! - `current` - Show the active toolchain
//! - `list` - List installed toolchains
//! - `resolve` - Show which version the project asks for and why
//! - `verify` - Check a file against a minisign signature
//! - `uninstall` - Remove an installed toolchain
//!
//! ## Examples
//!
//! Install whatever the project pins:
//! ```bash
//! toolpin install
//! ```
//!
//! Install and remember a specific version:
//! ```bash
//! toolpin install 0.13.0
//! ```

mod commands;
mod context;
mod manifest;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{current, install, list, resolve, uninstall, use_path, verify};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "TOOLPIN_LOG";

/// Per-project compiler toolchain manager.
#[derive(Parser)]
#[command(
    name = "toolpin",
    author,
    version,
    about = "Pin, verify, and install compiler toolchains per project",
    after_help = "\
VERSION RESOLUTION:
    The required version is taken from the first of:
    1. .toolchain-version in the project directory
    2. [toolchain] minimum_version in toolpin.toml (newest release at or above it)
    3. The version saved by 'toolpin install VERSION'
    4. The latest stable release

ENVIRONMENT VARIABLES:
    TOOLPIN_HOME            Toolchain directory (default: ~/.toolpin)
    TOOLPIN_INDEX_URL       Release index URL
    TOOLPIN_MIRRORS         Comma-separated mirror base URLs
    TOOLPIN_PUBLIC_KEY      Trusted minisign public key
    TOOLPIN_LOG             Log filter (e.g. debug, toolpin_engine=trace)"
)]
pub struct Cli {
    /// Project directory. Defaults to the current directory.
    #[clap(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    /// Log more detail to stderr. Repeat for trace output.
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Install the toolchain the project needs.
    ///
    /// With a VERSION, saves it as the user's preferred version first and
    /// clears any explicit executable path.
    Install(install::InstallArgs),

    /// Use an existing toolchain executable.
    ///
    /// The executable is asked for its version; nothing is downloaded.
    Use(use_path::UseArgs),

    /// Show the active toolchain.
    Current,

    /// List installed toolchain versions.
    List,

    /// Show the version requirement and where it came from.
    Resolve,

    /// Verify a file against a minisign signature.
    Verify(verify::VerifyArgs),

    /// Remove an installed toolchain version.
    Uninstall(uninstall::UninstallArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let project = cli.project.as_deref();
    match cli.command {
        Commands::Install(args) => install::execute(project, &args).await,
        Commands::Use(args) => use_path::execute(project, &args).await,
        Commands::Current => current::execute(project),
        Commands::List => list::execute(project),
        Commands::Resolve => resolve::execute(project),
        Commands::Verify(args) => verify::execute(&args),
        Commands::Uninstall(args) => uninstall::execute(project, &args),
    }
}
