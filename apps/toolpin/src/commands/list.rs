//! List command for the toolpin CLI.
//!
//! Displays installed toolchain versions and marks the current one.
//!
//! ## Output Format
//!
//! ```text
//! Installed toolchains:
//!
//!   0.12.0    (installed 3 days ago)
//! * 0.13.0    (current, installed today)
//! ```

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use crate::context::Context;

const SECONDS_PER_DAY: u64 = 86_400;

/// Executes the list command.
///
/// # Errors
///
/// Returns an error if the toolchains directory cannot be read.
pub fn execute(project: Option<&Path>) -> Result<()> {
    let ctx = Context::load(project)?;
    let installer = ctx.installer()?;
    let versions = installer.list_installed()?;
    let current = installer.current_version()?;

    if versions.is_empty() {
        println!("No toolchains installed.");
        println!();
        println!("Run 'toolpin install' to install the project's toolchain.");
        return Ok(());
    }

    println!("Installed toolchains:");
    println!();

    for version in &versions {
        let is_current = current.as_ref() == Some(version);
        let mut info = Vec::new();
        if is_current {
            info.push("current".to_string());
        }
        if let Some(meta) = installer.layout().read_metadata(version) {
            info.push(format!("installed {}", installed_ago(meta.installed_at)));
        }

        let marker = if is_current { "*" } else { " " };
        if info.is_empty() {
            println!("{marker} {version}");
        } else {
            println!("{marker} {version}    ({})", info.join(", "));
        }
    }
    Ok(())
}

fn installed_ago(installed_at: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    match now.saturating_sub(installed_at) / SECONDS_PER_DAY {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        days => format!("{days} days ago"),
    }
}
