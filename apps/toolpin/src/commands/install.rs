//! Install command for the toolpin CLI.
//!
//! Resolves the project's toolchain requirement and installs the matching
//! release, verifying its checksum and signature first.
//!
//! ## Usage
//!
//! ```bash
//! toolpin install            # whatever the project resolves to
//! toolpin install 0.13.0     # remember 0.13.0, then install it
//! toolpin install nightly    # remember the latest development build
//! ```

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use toolpin_engine::{ProviderState, Source, VersionRequirement};

use crate::context::Context;

/// Arguments for the install command.
#[derive(Args)]
pub struct InstallArgs {
    /// Version to remember and install ("0.13.0", ">=0.12.0", "latest", "nightly").
    ///
    /// If omitted, installs whatever the project resolves to.
    pub version: Option<String>,
}

/// Executes the install command.
///
/// # Errors
///
/// Returns an error if the version is malformed, the settings file cannot
/// be written, or the toolchain cannot be installed.
pub async fn execute(project: Option<&Path>, args: &InstallArgs) -> Result<()> {
    let ctx = Context::load(project)?;

    if let Some(raw) = &args.version {
        let requirement: VersionRequirement = raw
            .parse()
            .with_context(|| format!("Invalid version {raw:?}"))?;
        ctx.store.set_version(Some(requirement))?;
        ctx.store.set_executable_path(None)?;
    }

    let resolution = ctx.resolver().resolve();
    if args.version.is_some()
        && matches!(resolution.source, Source::PinnedFile | Source::ProjectManifest)
    {
        println!(
            "Note: the project's {} takes precedence over the saved version.",
            resolution.source
        );
    }
    println!(
        "Installing {} (from {})...",
        resolution.requirement, resolution.source
    );

    let provider = ctx.provider()?;
    let state = provider.refresh().await;
    provider.shutdown();
    report(&state)
}

/// Prints a terminal provider state, turning `Failed` into an error.
pub(crate) fn report(state: &ProviderState) -> Result<()> {
    match state {
        ProviderState::Ready(toolchain) => {
            println!(
                "Toolchain {} ready: {}",
                toolchain.version,
                toolchain.executable.display()
            );
            if let Some(min) = &toolchain.unsatisfied_minimum {
                println!();
                println!(
                    "Warning: the project requires at least {min}, but {} is selected.",
                    toolchain.version
                );
            }
            Ok(())
        }
        ProviderState::Failed(reason) => bail!("{reason}"),
        other => bail!("toolchain provider stopped early: {other:?}"),
    }
}
