//! Setup shared by the commands: engine configuration, the project root, and
//! the user settings file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use toolpin_engine::{
    ConfigStore, EngineConfig, FileConfigStore, HostTarget, Installer, ToolchainProvider,
    VersionResolver,
};

use crate::manifest::TomlManifest;

pub struct Context {
    pub config: EngineConfig,
    pub project_root: PathBuf,
    pub store: Arc<dyn ConfigStore>,
}

impl Context {
    /// Loads configuration and settles on a project root.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the current
    /// directory cannot be determined.
    pub fn load(project: Option<&Path>) -> Result<Self> {
        let config = EngineConfig::load()?;
        let project_root = match project {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };
        let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(config.settings_path()));
        Ok(Self {
            config,
            project_root,
            store,
        })
    }

    pub fn resolver(&self) -> VersionResolver {
        VersionResolver::new(
            Some(self.project_root.clone()),
            self.config.pinned_file_name.clone(),
            Arc::new(TomlManifest),
            Arc::clone(&self.store),
        )
    }

    /// # Errors
    ///
    /// Returns an error for unsupported hosts or an invalid trusted key.
    pub fn installer(&self) -> Result<Installer> {
        Ok(Installer::new(&self.config, HostTarget::detect()?)?)
    }

    /// Starts a provider for the project. Must be called inside the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported hosts or invalid configuration.
    pub fn provider(&self) -> Result<ToolchainProvider> {
        Ok(ToolchainProvider::from_config(
            &self.config,
            Some(self.project_root.clone()),
            Arc::new(TomlManifest),
            Arc::clone(&self.store),
        )?)
    }
}
