//! Version resolution.
//!
//! Decides which toolchain version a project wants and picks the matching
//! release from an index. Requirement sources, highest priority first:
//!
//! 1. A pinned file at the project root (`.toolchain-version` by default)
//! 2. The minimum version declared in the project manifest
//! 3. The user's configured version
//! 4. Latest stable
//!
//! Without a project root, sources 1 and 2 are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::error::{Result, ToolchainError};
use crate::index::{Artifact, ReleaseEntry, ReleaseIndex};
use crate::platform::HostTarget;
use crate::version::{Source, ToolchainVersion, VersionRequirement};

/// A minimum version declared by a project manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMinimum {
    pub version: ToolchainVersion,
    /// The manifest file that declared it, for diagnostics.
    pub location: PathBuf,
}

/// Reads the minimum toolchain version out of a project manifest.
///
/// Manifest syntax is owned by the embedder; the engine only needs the
/// resulting version.
pub trait ManifestReader: Send + Sync {
    fn minimum_version(&self, project_root: &Path) -> Option<ManifestMinimum>;
}

/// A project without a manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoManifest;

impl ManifestReader for NoManifest {
    fn minimum_version(&self, _project_root: &Path) -> Option<ManifestMinimum> {
        None
    }
}

/// The requirement in effect and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub requirement: VersionRequirement,
    pub source: Source,
    /// The manifest minimum, even when a higher-priority source won.
    pub minimum: Option<ManifestMinimum>,
}

impl Resolution {
    /// Returns the manifest minimum if `version` falls below it.
    #[must_use]
    pub fn unsatisfied_minimum(&self, version: &ToolchainVersion) -> Option<&ToolchainVersion> {
        self.minimum
            .as_ref()
            .map(|m| &m.version)
            .filter(|min| version < *min)
    }
}

/// Determines the effective version requirement.
#[derive(Clone)]
pub struct VersionResolver {
    project_root: Option<PathBuf>,
    pinned_file_name: String,
    manifest: Arc<dyn ManifestReader>,
    config: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for VersionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionResolver")
            .field("project_root", &self.project_root)
            .field("pinned_file_name", &self.pinned_file_name)
            .finish_non_exhaustive()
    }
}

impl VersionResolver {
    #[must_use]
    pub fn new(
        project_root: Option<PathBuf>,
        pinned_file_name: impl Into<String>,
        manifest: Arc<dyn ManifestReader>,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            project_root,
            pinned_file_name: pinned_file_name.into(),
            manifest,
            config,
        }
    }

    #[must_use]
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Path of the pinned file, if there is a project root.
    #[must_use]
    pub fn pinned_file(&self) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|root| root.join(&self.pinned_file_name))
    }

    /// Resolves the requirement by source priority.
    #[must_use]
    pub fn resolve(&self) -> Resolution {
        let minimum = self
            .project_root
            .as_deref()
            .and_then(|root| self.manifest.minimum_version(root));

        let (requirement, source) = if let Some(pinned) = self.read_pinned_file() {
            (pinned, Source::PinnedFile)
        } else if let Some(min) = &minimum {
            (
                VersionRequirement::AtLeast(min.version.clone()),
                Source::ProjectManifest,
            )
        } else if let Some(configured) = self.config.version() {
            (configured, Source::UserConfig)
        } else {
            (VersionRequirement::LatestStable, Source::Default)
        };

        tracing::debug!(%requirement, %source, "resolved toolchain requirement");
        Resolution {
            requirement,
            source,
            minimum,
        }
    }

    /// Reads the pinned file. Unreadable or invalid content is skipped.
    fn read_pinned_file(&self) -> Option<VersionRequirement> {
        let path = self.pinned_file()?;
        if !path.is_file() {
            return None;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read pinned version file: {e}");
                return None;
            }
        };
        let line = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))?;
        match line.parse() {
            Ok(req) => Some(req),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    value = line,
                    "ignoring invalid pinned version: {e}"
                );
                None
            }
        }
    }
}

/// Picks the release and host artifact satisfying `requirement`.
///
/// `AtLeast` prefers the highest stable release at or above the minimum and
/// falls back to a development build at or above it. Nothing below the
/// minimum is ever chosen.
///
/// # Errors
///
/// `NoSatisfyingVersion` when no entry matches, or when the matching entry
/// has no artifact for `host`.
pub fn select_release<'a>(
    index: &'a ReleaseIndex,
    requirement: &VersionRequirement,
    host: HostTarget,
) -> Result<(&'a ReleaseEntry, &'a Artifact)> {
    let entry = match requirement {
        VersionRequirement::Exact(version) => index.find(version).ok_or_else(|| {
            ToolchainError::no_satisfying_version(requirement, "version not in release index")
        })?,
        VersionRequirement::LatestStable => index.latest_stable().ok_or_else(|| {
            ToolchainError::no_satisfying_version(requirement, "index has no stable release")
        })?,
        VersionRequirement::LatestNightly => index.latest_nightly().ok_or_else(|| {
            ToolchainError::no_satisfying_version(requirement, "index has no development build")
        })?,
        VersionRequirement::AtLeast(min) => return select_at_least(index, requirement, min, host),
    };

    let artifact = entry.artifact_for(host).ok_or_else(|| no_host_artifact(requirement, entry, host))?;
    Ok((entry, artifact))
}

fn select_at_least<'a>(
    index: &'a ReleaseIndex,
    requirement: &VersionRequirement,
    min: &ToolchainVersion,
    host: HostTarget,
) -> Result<(&'a ReleaseEntry, &'a Artifact)> {
    let stable = index.satisfying(min);
    let dev = index
        .sorted_versions()
        .into_iter()
        .filter(|e| e.version.is_dev() && e.version >= *min);
    let mut candidates = stable.chain(dev).peekable();

    let Some(&highest) = candidates.peek() else {
        let newest = index
            .sorted_versions()
            .first()
            .map_or_else(|| "index is empty".to_string(), |e| format!("newest is {}", e.version));
        return Err(ToolchainError::no_satisfying_version(requirement, newest));
    };

    candidates
        .find_map(|entry| entry.artifact_for(host).map(|artifact| (entry, artifact)))
        .ok_or_else(|| no_host_artifact(requirement, highest, host))
}

fn no_host_artifact(
    requirement: &VersionRequirement,
    entry: &ReleaseEntry,
    host: HostTarget,
) -> ToolchainError {
    ToolchainError::no_satisfying_version(
        requirement,
        format!(
            "{} has no artifact for {host} (available: {})",
            entry.version,
            entry.available_hosts().join(", ")
        ),
    )
}
