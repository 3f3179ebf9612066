//! Current command for the toolpin CLI.
//!
//! ## Output Format
//!
//! ```text
//! 0.13.0 (/home/u/.toolpin/toolchains/0.13.0)
//! ```

use std::path::Path;

use anyhow::Result;

use crate::context::Context;

/// Executes the current command.
///
/// An explicit executable path, when saved, takes precedence over the
/// managed installation.
///
/// # Errors
///
/// Returns an error if the `current` file is unreadable.
pub fn execute(project: Option<&Path>) -> Result<()> {
    let ctx = Context::load(project)?;

    if let Some(path) = ctx.store.executable_path() {
        println!("{} (explicit path)", path.display());
        return Ok(());
    }

    let installer = ctx.installer()?;
    if let Some(version) = installer.current_version()?
        && let Some(dir) = installer.layout().current_dir()?
    {
        println!("{version} ({})", dir.display());
    } else {
        println!("No active toolchain.");
        println!();
        println!("Run 'toolpin install' to install one.");
    }
    Ok(())
}
