//! Uninstall command for the toolpin CLI.
//!
//! ## Usage
//!
//! ```bash
//! toolpin uninstall 0.12.0
//! ```

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use toolpin_engine::ToolchainVersion;

use crate::context::Context;

/// Arguments for the uninstall command.
#[derive(Args)]
pub struct UninstallArgs {
    /// Version to uninstall (e.g., "0.12.0").
    pub version: String,
}

/// Executes the uninstall command.
///
/// # Errors
///
/// Returns an error if the version is malformed, not installed, or current.
pub fn execute(project: Option<&Path>, args: &UninstallArgs) -> Result<()> {
    let ctx = Context::load(project)?;
    let version = ToolchainVersion::parse(&args.version)
        .with_context(|| format!("Invalid version {:?}", args.version))?;
    let installer = ctx.installer()?;

    installer.uninstall(&version)?;
    println!("Toolchain {version} uninstalled successfully.");
    Ok(())
}
