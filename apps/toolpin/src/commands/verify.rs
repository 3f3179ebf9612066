//! Verify command for the toolpin CLI.
//!
//! Checks a file against a detached minisign signature.
//!
//! ## Usage
//!
//! ```bash
//! toolpin verify RWSGOq2NVecA2UPN... zig.tar.xz            # reads zig.tar.xz.minisig
//! toolpin verify minisign.pub zig.tar.xz zig.tar.xz.minisig
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use toolpin_engine::minisign::{self, PublicKey, Signature};

/// Arguments for the verify command.
#[derive(Args)]
pub struct VerifyArgs {
    /// Minisign public key, or a file containing it.
    pub public_key: String,

    /// File to verify.
    pub file: PathBuf,

    /// Signature file. Defaults to FILE.minisig.
    pub signature: Option<PathBuf>,
}

/// Executes the verify command.
///
/// # Errors
///
/// Returns an error if any input is unreadable or malformed, or the
/// signature does not verify.
pub fn execute(args: &VerifyArgs) -> Result<()> {
    let key_text = if Path::new(&args.public_key).is_file() {
        std::fs::read_to_string(&args.public_key)
            .with_context(|| format!("Failed to read public key {}", args.public_key))?
    } else {
        args.public_key.clone()
    };
    let key = PublicKey::parse(&key_text).context("Invalid public key")?;

    let signature_path = args.signature.clone().unwrap_or_else(|| {
        let mut path = args.file.clone().into_os_string();
        path.push(".minisig");
        PathBuf::from(path)
    });
    let signature_text = std::fs::read_to_string(&signature_path)
        .with_context(|| format!("Failed to read signature {}", signature_path.display()))?;
    let signature = Signature::parse(&signature_text).context("Invalid signature file")?;

    let data = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let verified = minisign::verify_detailed(&key, &data, &signature)
        .with_context(|| format!("{} failed verification", args.file.display()))?;

    println!("Signature verified: {}", args.file.display());
    if let Some(comment) = &verified.trusted_comment {
        println!("Trusted comment: {comment}");
    }
    Ok(())
}
