//! Managed install directory layout.
//!
//! ## Directory Structure
//!
//! ```text
//! ~/.toolpin/                 # Engine home (or TOOLPIN_HOME)
//!   toolchains/               # Installed toolchain slots
//!     0.13.0/
//!       zig                   # Executable (root, bin/, or one level nested)
//!       lib/...
//!       .metadata.json        # Installation metadata
//!     0.12.0@5f3a9c0e12d4b7a1/  # Reinstall of a version that already had a slot
//!   staging/                  # Temporary extraction dirs, same filesystem
//!   current                   # File naming the current slot
//!   config.toml
//!   settings.toml
//! ```
//!
//! A slot is named after its version, optionally followed by `@` and a
//! unique suffix. The `current` file is the only pointer to the active
//! toolchain and names a slot, not just a version. It is replaced by writing
//! a temporary file next to it and renaming over it, so a reader sees either
//! the old slot or the new one. Slots are never renamed once published.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::{NamedTempFile, TempDir};

use crate::version::ToolchainVersion;

/// Metadata file name stored in each toolchain version directory.
const METADATA_FILE: &str = ".metadata.json";

/// Name of the file holding the current slot.
const CURRENT_FILE: &str = "current";

/// Separates a version from the unique suffix of a reinstalled slot.
const SLOT_SEPARATOR: char = '@';

/// The version a slot directory name holds, if it is a slot.
#[must_use]
pub fn slot_version(name: &str) -> Option<ToolchainVersion> {
    let version = name.split(SLOT_SEPARATOR).next()?;
    ToolchainVersion::parse(version).ok()
}

/// Metadata about a toolchain installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainMetadata {
    /// Unix timestamp of the install.
    pub installed_at: u64,
    /// Archive URL the toolchain was installed from.
    pub source_url: String,
}

impl ToolchainMetadata {
    #[must_use = "returns new metadata without side effects"]
    pub fn now(source_url: impl Into<String>) -> Self {
        let installed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            installed_at,
            source_url: source_url.into(),
        }
    }
}

/// Paths of the managed install directory.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub root: PathBuf,
    pub toolchains: PathBuf,
    pub staging: PathBuf,
}

impl InstallLayout {
    #[must_use = "returns new paths instance without side effects"]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            toolchains: root.join("toolchains"),
            staging: root.join("staging"),
            root,
        }
    }

    /// The canonical slot for `version`, whether or not it exists.
    #[must_use = "returns the path without side effects"]
    pub fn toolchain_dir(&self, version: &ToolchainVersion) -> PathBuf {
        self.toolchains.join(version.to_string())
    }

    /// Every existing slot holding `version`, sorted by name.
    #[must_use]
    pub fn slots(&self, version: &ToolchainVersion) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.toolchains) else {
            return Vec::new();
        };
        let mut slots: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(slot_version)
                    .as_ref()
                    == Some(version)
            })
            .collect();
        slots.sort();
        slots
    }

    /// The slot to use for `version`: the current one if it holds that
    /// version, else the canonical slot, else any other.
    #[must_use]
    pub fn slot_dir(&self, version: &ToolchainVersion) -> Option<PathBuf> {
        if let Ok(Some(current)) = self.current_dir()
            && current.is_dir()
            && self.current_version().ok().flatten().as_ref() == Some(version)
        {
            return Some(current);
        }
        let canonical = self.toolchain_dir(version);
        if canonical.is_dir() {
            return Some(canonical);
        }
        self.slots(version).into_iter().next()
    }

    #[must_use = "returns the path without side effects"]
    pub fn current_file(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    #[must_use = "returns installation status without side effects"]
    pub fn is_installed(&self, version: &ToolchainVersion) -> bool {
        self.slot_dir(version).is_some()
    }

    /// Creates the root, toolchains, and staging directories.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root, &self.toolchains, &self.staging] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Returns the slot name stored in the `current` file.
    fn current_slot(&self) -> Result<Option<String>> {
        let path = self.current_file();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read current version from {}", path.display()))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    /// Returns the version held by the current slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn current_version(&self) -> Result<Option<ToolchainVersion>> {
        let Some(slot) = self.current_slot()? else {
            return Ok(None);
        };
        slot_version(&slot).map(Some).with_context(|| {
            format!(
                "Invalid version {slot:?} in {}",
                self.current_file().display()
            )
        })
    }

    /// Returns the directory of the current slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn current_dir(&self) -> Result<Option<PathBuf>> {
        let Some(slot) = self.current_slot()? else {
            return Ok(None);
        };
        if slot_version(&slot).is_none() || slot.contains(['/', '\\']) {
            anyhow::bail!(
                "Invalid slot {slot:?} in {}",
                self.current_file().display()
            );
        }
        Ok(Some(self.toolchains.join(slot)))
    }

    /// Atomically points `current` at the slot holding `version`, or at its
    /// canonical slot if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn set_current_version(&self, version: &ToolchainVersion) -> Result<()> {
        let slot = self
            .slot_dir(version)
            .unwrap_or_else(|| self.toolchain_dir(version));
        self.set_current_slot(&slot)
    }

    /// Atomically points `current` at `slot`, a directory in `toolchains/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `slot` is not named like a slot, or the temporary
    /// file cannot be written or renamed.
    pub fn set_current_slot(&self, slot: &Path) -> Result<()> {
        let name = slot
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| slot_version(n).is_some())
            .with_context(|| format!("Not a toolchain slot: {}", slot.display()))?;
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create directory: {}", self.root.display()))?;
        let mut tmp = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("Failed to create temp file in {}", self.root.display()))?;
        tmp.write_all(name.as_bytes())
            .context("Failed to write current version")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush current version")?;
        tmp.persist(self.current_file()).map_err(|e| e.error).with_context(|| {
            format!(
                "Failed to write current version to {}",
                self.current_file().display()
            )
        })?;
        Ok(())
    }

    /// Lists installed versions, ascending.
    ///
    /// Directories whose name is not a version are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the toolchains directory cannot be read.
    pub fn list_installed(&self) -> Result<Vec<ToolchainVersion>> {
        if !self.toolchains.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.toolchains).with_context(|| {
            format!(
                "Failed to read toolchains directory: {}",
                self.toolchains.display()
            )
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| "Failed to read directory entry")?;
            let path = entry.path();
            if path.is_dir()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(version) = slot_version(name)
            {
                versions.push(version);
            }
        }

        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    /// Creates a uniquely named extraction directory under `staging/`.
    ///
    /// The directory is deleted when the handle drops unless it is published.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new_staging_dir(&self) -> Result<TempDir> {
        std::fs::create_dir_all(&self.staging)
            .with_context(|| format!("Failed to create directory: {}", self.staging.display()))?;
        tempfile::Builder::new()
            .prefix("stage-")
            .tempdir_in(&self.staging)
            .with_context(|| format!("Failed to create staging dir in {}", self.staging.display()))
    }

    /// Moves a staged tree into a new slot for `version` and returns it.
    ///
    /// The canonical slot is used when free. Otherwise the tree lands in a
    /// fresh `<version>@<suffix>` slot next to the existing one, which stays
    /// untouched until [`retire_slots`](Self::retire_slots) runs after
    /// `current` has moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged tree cannot be renamed into place.
    pub fn publish_staged(&self, staged: TempDir, version: &ToolchainVersion) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.toolchains).with_context(|| {
            format!("Failed to create directory: {}", self.toolchains.display())
        })?;
        let mut target = self.toolchain_dir(version);
        while target.exists() {
            target = self.toolchains.join(format!(
                "{version}{SLOT_SEPARATOR}{:016x}",
                rand::random::<u64>()
            ));
        }

        let staged_path = staged.keep();
        if let Err(e) = std::fs::rename(&staged_path, &target) {
            if let Err(cleanup) = std::fs::remove_dir_all(&staged_path) {
                tracing::warn!(
                    path = %staged_path.display(),
                    "failed to remove staged toolchain: {cleanup}"
                );
            }
            return Err(e).with_context(|| {
                format!(
                    "Failed to move {} to {}",
                    staged_path.display(),
                    target.display()
                )
            });
        }
        Ok(target)
    }

    /// Removes every slot of `version` except `keep`. Best effort: failures
    /// are logged.
    pub fn retire_slots(&self, version: &ToolchainVersion, keep: &Path) {
        for slot in self.slots(version) {
            if slot == keep {
                continue;
            }
            match std::fs::remove_dir_all(&slot) {
                Ok(()) => tracing::debug!(path = %slot.display(), "removed replaced toolchain"),
                Err(e) => tracing::warn!(
                    path = %slot.display(),
                    "failed to remove replaced toolchain: {e}"
                ),
            }
        }
    }

    /// Deletes every slot of an installed version.
    ///
    /// # Errors
    ///
    /// Returns an error if a slot exists but cannot be removed.
    pub fn remove_version(&self, version: &ToolchainVersion) -> Result<()> {
        for dir in self.slots(version) {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        Ok(())
    }

    /// Writes installation metadata for a toolchain version.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata file cannot be written.
    pub fn write_metadata(&self, dir: &Path, metadata: &ToolchainMetadata) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let content =
            serde_json::to_string_pretty(metadata).context("Failed to serialize metadata")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write metadata to {}", path.display()))?;
        Ok(())
    }

    /// Reads installation metadata. `None` if missing or unparsable.
    #[must_use = "returns metadata without side effects"]
    pub fn read_metadata(&self, version: &ToolchainVersion) -> Option<ToolchainMetadata> {
        let path = self.slot_dir(version)?.join(METADATA_FILE);
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Finds `file_name` in `dir`, its `bin/`, or one directory level down.
#[must_use]
pub fn find_executable(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let direct = [dir.join(file_name), dir.join("bin").join(file_name)];
    if let Some(found) = direct.into_iter().find(|p| p.is_file()) {
        return Some(found);
    }

    let mut nested: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .map(|p| p.join(file_name))
        .filter(|p| p.is_file())
        .collect();
    nested.sort();
    nested.into_iter().next()
}
