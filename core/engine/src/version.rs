//! Toolchain versions, requirements, and release channels.
//!
//! Versions follow semantic versioning. Development builds carry a
//! pre-release tag (`0.14.0-dev.3008+7cef585f5`), which places them above the
//! last stable release they build on and below the release they lead to.
//! Two dev builds of the same base compare by their pre-release identifiers,
//! with build metadata as the final tiebreak so the order stays total.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A concrete toolchain version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolchainVersion(semver::Version);

impl ToolchainVersion {
    /// Parses a version string, accepting an optional leading `v`.
    ///
    /// # Errors
    ///
    /// Returns the semver parse error if the string is not a valid version.
    pub fn parse(input: &str) -> Result<Self, semver::Error> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(trimmed).map(Self)
    }

    /// Returns the underlying semver value.
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }

    /// Returns true for development (pre-release) builds.
    #[must_use]
    pub fn is_dev(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Returns the release channel this version belongs to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        if self.is_dev() {
            Channel::Nightly
        } else {
            Channel::Stable
        }
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ToolchainVersion {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for ToolchainVersion {
    fn from(version: semver::Version) -> Self {
        Self(version)
    }
}

impl Serialize for ToolchainVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ToolchainVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Release track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Tagged releases.
    Stable,
    /// Development builds.
    Nightly,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Nightly => "nightly",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user (or project) asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRequirement {
    /// Exactly this version.
    Exact(ToolchainVersion),
    /// Any release at or above this version; the highest one is chosen.
    AtLeast(ToolchainVersion),
    /// The newest stable release.
    LatestStable,
    /// The newest development build.
    LatestNightly,
}

impl VersionRequirement {
    /// Returns the channel whose index should be consulted first.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Exact(v) => v.channel(),
            Self::AtLeast(_) | Self::LatestStable => Channel::Stable,
            Self::LatestNightly => Channel::Nightly,
        }
    }

    /// Returns true if `version` meets this requirement.
    ///
    /// The `Latest*` sentinels accept any version of their channel; whether
    /// it is actually the newest is decided against an index.
    #[must_use]
    pub fn matches(&self, version: &ToolchainVersion) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::AtLeast(min) => version >= min,
            Self::LatestStable => !version.is_dev(),
            Self::LatestNightly => version.is_dev(),
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::AtLeast(v) => write!(f, ">={v}"),
            Self::LatestStable => f.write_str("latest stable"),
            Self::LatestNightly => f.write_str("latest nightly"),
        }
    }
}

impl FromStr for VersionRequirement {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "latest" | "stable" => Ok(Self::LatestStable),
            "nightly" | "master" | "dev" => Ok(Self::LatestNightly),
            _ => {
                if let Some(min) = trimmed.strip_prefix(">=") {
                    ToolchainVersion::parse(min).map(Self::AtLeast)
                } else {
                    ToolchainVersion::parse(trimmed).map(Self::Exact)
                }
            }
        }
    }
}

/// Where a requirement came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// A version marker file at the project root.
    PinnedFile,
    /// The minimum-version field of the project manifest.
    ProjectManifest,
    /// The user/workspace configuration setting.
    UserConfig,
    /// Nothing configured; latest stable.
    Default,
    /// A pre-installed executable supplied directly by the user.
    ExplicitPath,
}

impl Source {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PinnedFile => "pinned-file",
            Self::ProjectManifest => "project-manifest",
            Self::UserConfig => "user-config",
            Self::Default => "default",
            Self::ExplicitPath => "explicit-path",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
