//! Engine configuration and the user settings store.
//!
//! [`EngineConfig`] holds everything the pipeline needs that is not part of a
//! project: where toolchains live, where the release index is served from,
//! which key signs releases, and timing knobs. It is read from
//! `<home>/config.toml` when that file exists, then environment overrides are
//! applied:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `TOOLPIN_HOME` | engine home directory |
//! | `TOOLPIN_INDEX_URL` | index URL for both channels |
//! | `TOOLPIN_MIRRORS` | comma-separated mirror base URLs |
//! | `TOOLPIN_PUBLIC_KEY` | trusted minisign public key |
//!
//! The [`ConfigStore`] trait is the boundary to whoever owns the user's
//! version and executable-path settings (an editor, a settings file).

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolchainError};
use crate::version::{Channel, VersionRequirement};

pub const HOME_ENV: &str = "TOOLPIN_HOME";
pub const INDEX_URL_ENV: &str = "TOOLPIN_INDEX_URL";
pub const MIRRORS_ENV: &str = "TOOLPIN_MIRRORS";
pub const PUBLIC_KEY_ENV: &str = "TOOLPIN_PUBLIC_KEY";

const CONFIG_FILE: &str = "config.toml";
const SETTINGS_FILE: &str = "settings.toml";

const DEFAULT_INDEX_URL: &str = "https://ziglang.org/download/index.json";

/// Minisign key that signs official Zig release tarballs.
pub const DEFAULT_PUBLIC_KEY: &str = "RWSGOq2NVecA2UPNdBUZykf1CCb147pkmdtYxgb3Ti+JO/wCYvhbAb/U";

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the managed directory (`toolchains/`, `staging/`, `current`).
    pub home: PathBuf,
    pub stable_index_url: String,
    pub nightly_index_url: String,
    /// Mirror base URLs, tried in order after the canonical source.
    pub mirrors: Vec<String>,
    pub trusted_public_key: String,
    /// Per-attempt timeout for index fetches.
    pub request_timeout_secs: u64,
    /// Per-attempt timeout for archive downloads.
    pub download_timeout_secs: u64,
    /// Timeout for the installed executable's version query.
    pub probe_timeout_secs: u64,
    /// Quiet period before a triggered refresh runs.
    pub debounce_ms: u64,
    /// Name of the version marker file at a project root.
    pub pinned_file_name: String,
    /// Executable name without platform extension.
    pub executable_name: String,
    /// Arguments that make the executable print its version.
    pub version_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from(".toolpin"),
            stable_index_url: DEFAULT_INDEX_URL.to_string(),
            nightly_index_url: DEFAULT_INDEX_URL.to_string(),
            mirrors: Vec::new(),
            trusted_public_key: DEFAULT_PUBLIC_KEY.to_string(),
            request_timeout_secs: 30,
            download_timeout_secs: 300,
            probe_timeout_secs: 10,
            debounce_ms: 250,
            pinned_file_name: ".toolchain-version".to_string(),
            executable_name: "zig".to_string(),
            version_args: vec!["version".to_string()],
        }
    }
}

impl EngineConfig {
    /// Loads configuration for the default home directory.
    ///
    /// The home directory is determined by:
    /// 1. The `TOOLPIN_HOME` environment variable if set
    /// 2. On Windows: `%APPDATA%\toolpin`
    /// 3. Elsewhere: `~/.toolpin`
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the home directory cannot be determined or
    /// `config.toml` is present but invalid.
    pub fn load() -> Result<Self> {
        let home = match std::env::var(HOME_ENV) {
            Ok(home) if !home.trim().is_empty() => PathBuf::from(home),
            _ => default_home()?,
        };
        let mut config = Self::load_from(&home)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `<home>/config.toml` if present, defaults otherwise.
    ///
    /// Environment variables are not consulted.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for unreadable or malformed files.
    pub fn load_from(home: &Path) -> Result<Self> {
        let path = home.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                ToolchainError::config(format!("cannot read {}: {e}", path.display()))
            })?;
            toml::from_str::<Self>(&content).map_err(|e| {
                ToolchainError::config(format!("invalid {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    /// Returns defaults rooted at `home`. Used by tests and embedders.
    #[must_use]
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Applies overrides from a variable lookup.
    ///
    /// Empty or whitespace-only values are treated as unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(home) = get(HOME_ENV) {
            self.home = PathBuf::from(home.trim());
        }
        if let Some(url) = get(INDEX_URL_ENV) {
            let url = url.trim().to_string();
            self.stable_index_url.clone_from(&url);
            self.nightly_index_url = url;
        }
        if let Some(mirrors) = get(MIRRORS_ENV) {
            self.mirrors = mirrors
                .split(',')
                .map(|m| m.trim().trim_end_matches('/').to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(key) = get(PUBLIC_KEY_ENV) {
            self.trusted_public_key = key.trim().to_string();
        }
    }

    #[must_use]
    pub fn index_url(&self, channel: Channel) -> &str {
        match channel {
            Channel::Stable => &self.stable_index_url,
            Channel::Nightly => &self.nightly_index_url,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Path of the default [`FileConfigStore`] settings file.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.home.join(SETTINGS_FILE)
    }
}

fn default_home() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        dirs::data_dir()
            .map(|d| d.join("toolpin"))
            .ok_or_else(|| {
                ToolchainError::config(format!(
                    "Cannot determine AppData directory. Set {HOME_ENV} environment variable."
                ))
            })
    }
    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|d| d.join(".toolpin"))
            .ok_or_else(|| {
                ToolchainError::config(format!(
                    "Cannot determine home directory. Set {HOME_ENV} environment variable."
                ))
            })
    }
}

/// Source of the user's toolchain settings.
///
/// The engine reads these on every pipeline run, so a change made through
/// the store takes effect on the next refresh.
pub trait ConfigStore: Send + Sync {
    /// The configured version requirement, if any.
    fn version(&self) -> Option<VersionRequirement>;

    /// Replaces the configured version requirement.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be persisted.
    fn set_version(&self, version: Option<VersionRequirement>) -> Result<()>;

    /// A pre-installed executable that bypasses the managed install.
    fn executable_path(&self) -> Option<PathBuf>;

    /// Replaces the explicit executable path.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be persisted.
    fn set_executable_path(&self, path: Option<PathBuf>) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Settings {
    version: Option<VersionRequirement>,
    executable_path: Option<PathBuf>,
}

/// In-memory settings. Used by embedders that persist settings themselves.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: RwLock<Settings>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_version(version: VersionRequirement) -> Self {
        Self {
            inner: RwLock::new(Settings {
                version: Some(version),
                executable_path: None,
            }),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn version(&self) -> Option<VersionRequirement> {
        self.inner.read().ok()?.version.clone()
    }

    fn set_version(&self, version: Option<VersionRequirement>) -> Result<()> {
        let mut settings = self
            .inner
            .write()
            .map_err(|_| ToolchainError::config("settings lock poisoned"))?;
        settings.version = version;
        Ok(())
    }

    fn executable_path(&self) -> Option<PathBuf> {
        self.inner.read().ok()?.executable_path.clone()
    }

    fn set_executable_path(&self, path: Option<PathBuf>) -> Result<()> {
        let mut settings = self
            .inner
            .write()
            .map_err(|_| ToolchainError::config("settings lock poisoned"))?;
        settings.executable_path = path;
        Ok(())
    }
}

/// On-disk form of the settings file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executable_path: Option<PathBuf>,
}

/// Settings persisted to a TOML file:
///
/// ```toml
/// version = "0.13.0"
/// executable_path = "/opt/zig/zig"
/// ```
///
/// The file is re-read on every access so external edits are picked up.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings: {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings: {}", self.path.display()))
    }

    fn update(&self, apply: impl FnOnce(&mut SettingsFile)) -> Result<()> {
        let mut settings = self
            .read()
            .map_err(|e| ToolchainError::config(format!("{e:#}")))?;
        apply(&mut settings);
        self.write(&settings)
            .map_err(|e| ToolchainError::config(format!("{e:#}")))
    }

    fn write(&self, settings: &SettingsFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings: {}", self.path.display()))
    }
}

impl ConfigStore for FileConfigStore {
    fn version(&self) -> Option<VersionRequirement> {
        let raw = match self.read() {
            Ok(settings) => settings.version?,
            Err(e) => {
                tracing::warn!("ignoring unreadable settings file: {e:#}");
                return None;
            }
        };
        match raw.parse() {
            Ok(req) => Some(req),
            Err(e) => {
                tracing::warn!(value = %raw, "ignoring invalid configured version: {e}");
                None
            }
        }
    }

    fn set_version(&self, version: Option<VersionRequirement>) -> Result<()> {
        self.update(|s| s.version = version.map(|v| requirement_to_setting(&v)))
    }

    fn executable_path(&self) -> Option<PathBuf> {
        self.read().ok()?.executable_path
    }

    fn set_executable_path(&self, path: Option<PathBuf>) -> Result<()> {
        self.update(|s| s.executable_path = path)
    }
}

/// Renders a requirement in the form `VersionRequirement::from_str` reads back.
fn requirement_to_setting(req: &VersionRequirement) -> String {
    match req {
        VersionRequirement::LatestStable => "latest".to_string(),
        VersionRequirement::LatestNightly => "nightly".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::ToolchainVersion;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_the_zig_index() {
        let config = EngineConfig::default();
        assert_eq!(config.index_url(Channel::Stable), DEFAULT_INDEX_URL);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.pinned_file_name, ".toolchain-version");
        assert!(config.mirrors.is_empty());
    }

    #[test]
    fn load_from_reads_partial_toml() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "mirrors = [\"https://m1.example\", \"https://m2.example\"]\ndebounce_ms = 10\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(home.path()).unwrap();

        assert_eq!(config.home, home.path());
        assert_eq!(config.mirrors.len(), 2);
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.executable_name, "zig");
    }

    #[test]
    fn load_from_rejects_malformed_toml() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "debounce_ms = \"soon\"").unwrap();

        let err = EngineConfig::load_from(home.path()).unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Config);
    }

    #[test]
    fn env_overrides_apply_and_ignore_blank_values() {
        let vars: HashMap<&str, &str> = [
            (INDEX_URL_ENV, "http://localhost:9/index.json"),
            (MIRRORS_ENV, "https://a.example/, ,https://b.example"),
            (PUBLIC_KEY_ENV, "   "),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();

        config.apply_env_overrides(|k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.stable_index_url, "http://localhost:9/index.json");
        assert_eq!(config.nightly_index_url, "http://localhost:9/index.json");
        assert_eq!(config.mirrors, ["https://a.example", "https://b.example"]);
        assert_eq!(config.trusted_public_key, DEFAULT_PUBLIC_KEY);
    }

    #[test]
    #[serial]
    fn load_honors_home_env() {
        let home = tempfile::tempdir().unwrap();
        let original = std::env::var(HOME_ENV).ok();
        // SAFETY: This test is marked #[serial] so no other test touches the
        // environment concurrently.
        unsafe {
            std::env::set_var(HOME_ENV, home.path());
        }

        let config = EngineConfig::load().unwrap();

        unsafe {
            match original {
                Some(val) => std::env::set_var(HOME_ENV, val),
                None => std::env::remove_var(HOME_ENV),
            }
        }
        assert_eq!(config.home, home.path());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.version(), None);

        store
            .set_version(Some(VersionRequirement::LatestNightly))
            .unwrap();
        store
            .set_executable_path(Some(PathBuf::from("/opt/zig/zig")))
            .unwrap();

        assert_eq!(store.version(), Some(VersionRequirement::LatestNightly));
        assert_eq!(store.executable_path(), Some(PathBuf::from("/opt/zig/zig")));
    }

    #[test]
    fn file_store_persists_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let store = FileConfigStore::new(&path);
        let v = ToolchainVersion::parse("0.13.0").unwrap();

        store
            .set_version(Some(VersionRequirement::Exact(v.clone())))
            .unwrap();
        store
            .set_executable_path(Some(PathBuf::from("/usr/bin/zig")))
            .unwrap();

        let reopened = FileConfigStore::new(&path);
        assert_eq!(reopened.version(), Some(VersionRequirement::Exact(v)));
        assert_eq!(
            reopened.executable_path(),
            Some(PathBuf::from("/usr/bin/zig"))
        );

        reopened.set_version(Some(VersionRequirement::LatestStable)).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"latest\""));
        assert_eq!(reopened.version(), Some(VersionRequirement::LatestStable));
    }

    #[test]
    fn file_store_ignores_invalid_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "version = \"banana\"\n").unwrap();

        assert_eq!(FileConfigStore::new(&path).version(), None);
    }
}
