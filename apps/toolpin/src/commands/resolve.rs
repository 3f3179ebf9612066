//! Resolve command for the toolpin CLI.
//!
//! Shows which version the project asks for and which source decided it,
//! without touching the network.
//!
//! ## Output Format
//!
//! ```text
//! requirement: >=0.12.0
//! source:      project-manifest
//! minimum:     0.12.0 (/work/demo/toolpin.toml)
//! ```

use std::path::Path;

use anyhow::Result;
use toolpin_engine::Source;

use crate::context::Context;

/// Executes the resolve command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
pub fn execute(project: Option<&Path>) -> Result<()> {
    let ctx = Context::load(project)?;
    let resolver = ctx.resolver();
    let resolution = resolver.resolve();

    println!("requirement: {}", resolution.requirement);
    match (resolution.source, resolver.pinned_file()) {
        (Source::PinnedFile, Some(file)) => {
            println!("source:      {} ({})", resolution.source, file.display());
        }
        (source, _) => println!("source:      {source}"),
    }
    if let Some(min) = &resolution.minimum {
        println!("minimum:     {} ({})", min.version, min.location.display());
    }
    if let Some(path) = ctx.store.executable_path() {
        println!("executable:  {} (overrides the requirement)", path.display());
    }
    Ok(())
}
