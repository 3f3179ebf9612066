#![warn(clippy::pedantic)]
//! Toolchain Acquisition Engine
//!
//! This crate decides which compiler toolchain version a project needs,
//! obtains it from a signed release index, installs it atomically, and keeps
//! observers informed as the choice changes.
//!
//! ## Overview
//!
//! ```text
//! resolve requirement → fetch index → select release → download
//!     → verify (sha256 + minisign) → stage → probe → publish → Ready
//! ```
//!
//! The pieces can be used independently:
//!
//! - [`minisign`] verifies detached minisign signatures
//! - [`index`] fetches and parses release indexes with mirror fallback
//! - [`resolver`] picks a requirement by source priority and a release from an index
//! - [`installer`] downloads, verifies, and atomically installs a release
//! - [`provider`] ties them together behind a debounced state machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolpin_engine::{EngineConfig, MemoryConfigStore, NoManifest, ProviderState, ToolchainProvider};
//!
//! # async fn demo() -> toolpin_engine::Result<()> {
//! let config = EngineConfig::load()?;
//! let provider = ToolchainProvider::from_config(
//!     &config,
//!     Some(std::env::current_dir().map_err(|e| toolpin_engine::ToolchainError::io("cwd", e))?),
//!     Arc::new(NoManifest),
//!     Arc::new(MemoryConfigStore::new()),
//! )?;
//!
//! if let ProviderState::Ready(toolchain) = provider.refresh().await {
//!     println!("{} at {}", toolchain.version, toolchain.executable.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Directory Layout
//!
//! ```text
//! <home>/
//! ├── config.toml        # optional EngineConfig
//! ├── current            # active version
//! ├── staging/           # in-progress installs
//! └── toolchains/
//!     └── 0.13.0/
//!         ├── zig
//!         └── .metadata.json
//! ```

pub mod archive;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod installer;
pub mod minisign;
pub mod paths;
pub mod platform;
pub mod probe;
pub mod provider;
pub mod resolver;
pub mod version;

pub use config::{ConfigStore, EngineConfig, FileConfigStore, MemoryConfigStore};
pub use error::{FailureKind, FailureReason, Result, ToolchainError};
pub use index::{Artifact, FetchSession, IndexFetcher, ReleaseEntry, ReleaseIndex};
pub use installer::{InstalledToolchain, Installer};
pub use platform::HostTarget;
pub use provider::{Pipeline, ProviderState, ResolvedToolchain, ToolchainProvider};
pub use resolver::{ManifestMinimum, ManifestReader, NoManifest, Resolution, VersionResolver};
pub use version::{Channel, Source, ToolchainVersion, VersionRequirement};

/// Engine version, reported in the HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
