//! Project manifest support.
//!
//! A project may declare the oldest toolchain it builds with in
//! `toolpin.toml`:
//!
//! ```toml
//! [toolchain]
//! minimum_version = "0.13.0"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use toolpin_engine::{ManifestMinimum, ManifestReader, ToolchainVersion};

/// Manifest file name at the project root.
pub const MANIFEST_FILE: &str = "toolpin.toml";

#[derive(Debug, Default, Deserialize)]
struct ProjectManifest {
    #[serde(default)]
    toolchain: ToolchainSection,
}

#[derive(Debug, Default, Deserialize)]
struct ToolchainSection {
    minimum_version: Option<String>,
}

/// Reads `[toolchain] minimum_version` from `toolpin.toml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlManifest;

impl TomlManifest {
    fn read(path: &Path) -> Result<Option<ToolchainVersion>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: ProjectManifest = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        manifest
            .toolchain
            .minimum_version
            .map(|raw| {
                ToolchainVersion::parse(&raw)
                    .with_context(|| format!("Invalid minimum_version {raw:?}"))
            })
            .transpose()
    }
}

impl ManifestReader for TomlManifest {
    fn minimum_version(&self, project_root: &Path) -> Option<ManifestMinimum> {
        let path = project_root.join(MANIFEST_FILE);
        if !path.is_file() {
            return None;
        }
        match Self::read(&path) {
            Ok(version) => version.map(|version| ManifestMinimum {
                version,
                location: path,
            }),
            Err(e) => {
                tracing::warn!("ignoring project manifest: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(manifest: &str) -> assert_fs::TempDir {
        let dir = assert_fs::TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    #[test]
    fn reads_minimum_version_and_location() {
        let dir = project("[toolchain]\nminimum_version = \"0.12.0\"\n");

        let min = TomlManifest.minimum_version(dir.path()).unwrap();

        assert_eq!(min.version.to_string(), "0.12.0");
        assert_eq!(min.location, dir.path().join(MANIFEST_FILE));
    }

    #[test]
    fn missing_section_or_file_means_no_minimum() {
        let dir = project("[package]\nname = \"demo\"\n");
        assert_eq!(TomlManifest.minimum_version(dir.path()), None);

        let empty = assert_fs::TempDir::new().unwrap();
        assert_eq!(TomlManifest.minimum_version(empty.path()), None);
    }

    #[test]
    fn invalid_manifest_is_ignored() {
        let dir = project("[toolchain]\nminimum_version = \"soon\"\n");
        assert_eq!(TomlManifest.minimum_version(dir.path()), None);
    }
}
