//! Host platform detection.
//!
//! Release indexes key their artifacts by a host triple of the form
//! `<arch>-<os>` (`x86_64-linux`, `aarch64-macos`, `x86_64-windows`). This
//! module maps the running system onto that naming and supplies the
//! per-platform conventions the installer needs.

use std::fmt;

use crate::archive::ArchiveFormat;
use crate::error::{Result, ToolchainError};

/// Architectures that release indexes publish artifacts for.
const SUPPORTED_ARCHES: &[&str] = &[
    "x86_64",
    "aarch64",
    "x86",
    "arm",
    "riscv64",
    "powerpc64le",
    "loongarch64",
    "s390x",
];

/// Operating systems that release indexes publish artifacts for.
const SUPPORTED_OSES: &[&str] = &["linux", "macos", "windows", "freebsd", "netbsd"];

/// The operating system and architecture pair identifying release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTarget {
    arch: &'static str,
    os: &'static str,
}

impl HostTarget {
    /// Detects the host this process runs on.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the OS/architecture pair has no
    /// published artifacts.
    pub fn detect() -> Result<Self> {
        Self::new(std::env::consts::ARCH, std::env::consts::OS)
    }

    /// Builds a target from explicit parts, validating them.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for unknown architectures or systems.
    pub fn new(arch: &str, os: &str) -> Result<Self> {
        let arch = SUPPORTED_ARCHES
            .iter()
            .find(|a| **a == arch)
            .copied()
            .ok_or_else(|| ToolchainError::config(format!("unsupported architecture: {arch}")))?;
        let os = SUPPORTED_OSES
            .iter()
            .find(|o| **o == os)
            .copied()
            .ok_or_else(|| ToolchainError::config(format!("unsupported operating system: {os}")))?;
        Ok(Self { arch, os })
    }

    /// Returns the index key for this host, e.g. `x86_64-linux`.
    #[must_use]
    pub fn triple(self) -> String {
        format!("{}-{}", self.arch, self.os)
    }

    #[must_use]
    pub fn arch(self) -> &'static str {
        self.arch
    }

    #[must_use]
    pub fn os(self) -> &'static str {
        self.os
    }

    #[must_use]
    pub fn is_windows(self) -> bool {
        self.os == "windows"
    }

    /// Returns `.exe` on Windows, empty elsewhere.
    #[must_use]
    pub fn executable_extension(self) -> &'static str {
        if self.is_windows() { ".exe" } else { "" }
    }

    /// Archive format used when a download URL carries no recognizable
    /// extension: zip on Windows, xz-compressed tar everywhere else.
    #[must_use]
    pub fn default_archive_format(self) -> ArchiveFormat {
        if self.is_windows() {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarXz
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch, self.os)
    }
}
