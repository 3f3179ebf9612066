//! Use command for the toolpin CLI.
//!
//! Points toolpin at an executable the user installed themselves. The
//! executable is asked for its version; nothing is downloaded. The path is
//! saved so later commands keep using it until `toolpin install VERSION`.
//!
//! ## Usage
//!
//! ```bash
//! toolpin use /opt/zig/zig
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use toolpin_engine::ProviderState;

use super::install::report;
use crate::context::Context;

/// Arguments for the use command.
#[derive(Args)]
pub struct UseArgs {
    /// Path to a toolchain executable.
    pub path: PathBuf,
}

/// Executes the use command.
///
/// # Errors
///
/// Returns an error if the executable does not answer the version query or
/// the settings file cannot be written.
pub async fn execute(project: Option<&Path>, args: &UseArgs) -> Result<()> {
    let ctx = Context::load(project)?;
    let provider = ctx.provider()?;
    let state = provider.resolve_explicit_path(&args.path).await;
    provider.shutdown();

    if let ProviderState::Ready(toolchain) = &state {
        ctx.store
            .set_executable_path(Some(toolchain.executable.clone()))?;
    }
    report(&state)
}
