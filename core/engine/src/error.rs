//! Error types for the toolchain engine.
//!
//! `ToolchainError` consolidates every failure the acquisition pipeline can
//! produce. Components return it directly; internal helpers that work with
//! `anyhow::Result` are converted at the component boundary so callers can
//! still match on the failure kind.
//!
//! The provider never lets these escape: each one is folded into a
//! [`FailureReason`] and surfaced through the `Failed` state.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Consolidated error type for toolchain resolution and installation.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// No release in the index satisfies the requirement for this host.
    #[error("no release satisfies {requirement}: {message}")]
    NoSatisfyingVersion {
        /// Human-readable form of the requirement that could not be met.
        requirement: String,
        /// Why nothing matched.
        message: String,
    },

    /// Every index source (canonical and mirrors) failed.
    #[error("release index unavailable for {channel} channel: {}", attempts.join("; "))]
    IndexUnavailable {
        /// The channel that was requested.
        channel: String,
        /// One line per attempted source describing its failure.
        attempts: Vec<String>,
    },

    /// The archive or its signature could not be downloaded.
    #[error("download failed: {message}")]
    DownloadFailed {
        /// Description of the download error.
        message: String,
    },

    /// The archive's signature did not verify against the trusted key.
    #[error("signature verification failed for {artifact}: {message}")]
    SignatureInvalid {
        /// File name of the rejected artifact.
        artifact: String,
        /// Description of the verification failure.
        message: String,
    },

    /// The verified archive could not be unpacked.
    #[error("extraction failed: {message}")]
    ExtractionFailed {
        /// Description of the extraction error.
        message: String,
    },

    /// The installed executable does not report the expected version.
    #[error("version mismatch: expected {expected}, executable reported {actual}")]
    VersionMismatch {
        /// The version that was being installed.
        expected: String,
        /// What the version query returned (or why it failed).
        actual: String,
    },

    /// A user-supplied executable path could not be validated.
    #[error("invalid toolchain path {}: {message}", path.display())]
    PathInvalid {
        /// The rejected path.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },

    /// Filesystem error outside the distinct pipeline steps.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O operation that failed.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl ToolchainError {
    /// Creates a new `NoSatisfyingVersion` error.
    #[must_use]
    pub fn no_satisfying_version(
        requirement: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::NoSatisfyingVersion {
            requirement: requirement.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new `IndexUnavailable` error.
    #[must_use]
    pub fn index_unavailable(channel: impl fmt::Display, attempts: Vec<String>) -> Self {
        Self::IndexUnavailable {
            channel: channel.to_string(),
            attempts,
        }
    }

    /// Creates a new `DownloadFailed` error.
    #[must_use]
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Creates a new `SignatureInvalid` error.
    #[must_use]
    pub fn signature_invalid(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            artifact: artifact.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ExtractionFailed` error.
    #[must_use]
    pub fn extraction_failed(message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
        }
    }

    /// Creates a new `VersionMismatch` error.
    #[must_use]
    pub fn version_mismatch(expected: impl fmt::Display, actual: impl Into<String>) -> Self {
        Self::VersionMismatch {
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }

    /// Creates a new `PathInvalid` error.
    #[must_use]
    pub fn path_invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PathInvalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Io` error with context.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the taxonomy tag for this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoSatisfyingVersion { .. } => FailureKind::NoSatisfyingVersion,
            Self::IndexUnavailable { .. } => FailureKind::IndexUnavailable,
            Self::DownloadFailed { .. } => FailureKind::DownloadFailed,
            Self::SignatureInvalid { .. } => FailureKind::SignatureInvalid,
            Self::ExtractionFailed { .. } => FailureKind::ExtractionFailed,
            Self::VersionMismatch { .. } => FailureKind::VersionMismatch,
            Self::PathInvalid { .. } => FailureKind::PathInvalid,
            Self::Io { .. } => FailureKind::Io,
            Self::Config { .. } => FailureKind::Config,
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = ToolchainError> = std::result::Result<T, E>;

/// Tag identifying which step of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No release in the index meets the requirement for this host.
    NoSatisfyingVersion,
    /// Neither the canonical index nor any mirror returned a usable index.
    IndexUnavailable,
    /// Every candidate URL failed to download or had the wrong checksum.
    DownloadFailed,
    /// The archive's minisign signature did not verify.
    SignatureInvalid,
    /// The verified archive could not be unpacked.
    ExtractionFailed,
    /// The installed executable reports a different version than expected.
    VersionMismatch,
    /// A user-supplied executable is missing or not a working toolchain.
    PathInvalid,
    /// Filesystem failure in the install directory.
    Io,
    /// Invalid configuration or a refused request.
    Config,
}

impl FailureKind {
    /// Returns the stable identifier for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSatisfyingVersion => "no-satisfying-version",
            Self::IndexUnavailable => "index-unavailable",
            Self::DownloadFailed => "download-failed",
            Self::SignatureInvalid => "signature-invalid",
            Self::ExtractionFailed => "extraction-failed",
            Self::VersionMismatch => "version-mismatch",
            Self::PathInvalid => "path-invalid",
            Self::Io => "io",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable snapshot of a failure, carried by the provider's `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Which step failed.
    pub kind: FailureKind,
    /// Rendered error message.
    pub message: String,
}

impl From<&ToolchainError> for FailureReason {
    fn from(err: &ToolchainError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ToolchainError> for FailureReason {
    fn from(err: ToolchainError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}
