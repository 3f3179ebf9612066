//! Download, verification, and atomic installation of toolchain releases.
//!
//! An install runs in two phases:
//!
//! 1. [`Installer::stage`] downloads the archive, checks its shasum and
//!    minisign signature, extracts it into a fresh directory under
//!    `staging/`, and confirms the executable reports the expected version.
//! 2. [`Installer::publish`] renames the staged tree into
//!    `toolchains/<version>` and atomically repoints `current`.
//!
//! A staged toolchain that is dropped without being published deletes its
//! directory, so a failure or interruption before publish leaves the
//! installed set and the `current` pointer untouched.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::archive;
use crate::config::EngineConfig;
use crate::download::{self, Downloader};
use crate::error::{Result, ToolchainError};
use crate::index::{Artifact, ReleaseEntry, SignatureSource};
use crate::minisign::{self, PublicKey};
use crate::paths::{self, InstallLayout, ToolchainMetadata};
use crate::platform::HostTarget;
use crate::probe::VersionProbe;
use crate::version::ToolchainVersion;

/// A toolchain present in the managed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledToolchain {
    pub version: ToolchainVersion,
    pub executable: PathBuf,
}

/// A verified, extracted toolchain waiting to be published.
///
/// Dropping it removes the staging directory.
#[derive(Debug)]
pub struct StagedToolchain {
    dir: TempDir,
    version: ToolchainVersion,
    executable: PathBuf,
    source_url: String,
}

impl StagedToolchain {
    #[must_use]
    pub fn version(&self) -> &ToolchainVersion {
        &self.version
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// URL the archive was actually downloaded from.
    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

/// Why one candidate URL was rejected.
enum CandidateFailure {
    Download(String),
    Signature(String),
}

/// Installs releases into an [`InstallLayout`].
#[derive(Debug, Clone)]
pub struct Installer {
    layout: InstallLayout,
    host: HostTarget,
    downloader: Downloader,
    public_key: PublicKey,
    mirrors: Vec<String>,
    probe: VersionProbe,
    executable_name: String,
}

impl Installer {
    /// # Errors
    ///
    /// `Config` if the trusted key is malformed or the HTTP client cannot be
    /// built.
    pub fn new(config: &EngineConfig, host: HostTarget) -> Result<Self> {
        let public_key = PublicKey::parse(&config.trusted_public_key)
            .map_err(|e| ToolchainError::config(format!("trusted public key: {e}")))?;
        let downloader = Downloader::new(config.download_timeout())
            .map_err(|e| ToolchainError::config(format!("{e:#}")))?;
        Ok(Self {
            layout: InstallLayout::new(&config.home),
            host,
            downloader,
            public_key,
            mirrors: config.mirrors.clone(),
            probe: VersionProbe::new(config.version_args.clone(), config.probe_timeout()),
            executable_name: format!("{}{}", config.executable_name, host.executable_extension()),
        })
    }

    /// Replaces the downloader, e.g. to shorten retry delays.
    #[must_use]
    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    #[must_use]
    pub fn probe(&self) -> &VersionProbe {
        &self.probe
    }

    /// Executable file name including the platform extension.
    #[must_use]
    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    /// Downloads, verifies, extracts, and publishes `entry`.
    ///
    /// # Errors
    ///
    /// `DownloadFailed`, `SignatureInvalid`, `ExtractionFailed`,
    /// `VersionMismatch`, or `Io` for the failing step.
    pub async fn install(
        &self,
        entry: &ReleaseEntry,
        artifact: &Artifact,
        target_version: &ToolchainVersion,
    ) -> Result<InstalledToolchain> {
        let staged = self.stage(entry, artifact, target_version).await?;
        self.publish(staged)
    }

    /// Candidate download URLs: the canonical one, then one per mirror.
    #[must_use]
    pub fn candidate_urls(&self, artifact: &Artifact) -> Vec<String> {
        let filename = artifact.filename();
        std::iter::once(artifact.tarball.clone())
            .chain(
                self.mirrors
                    .iter()
                    .map(|m| format!("{}/{filename}", m.trim_end_matches('/'))),
            )
            .collect()
    }

    /// Runs every step up to, but not including, publication.
    ///
    /// # Errors
    ///
    /// As [`install`](Self::install), minus `Io` from publication.
    pub async fn stage(
        &self,
        entry: &ReleaseEntry,
        artifact: &Artifact,
        target_version: &ToolchainVersion,
    ) -> Result<StagedToolchain> {
        if entry.version != *target_version {
            return Err(ToolchainError::version_mismatch(
                target_version,
                format!("release entry is for {}", entry.version),
            ));
        }

        let (bytes, source_url) = self.download_verified(artifact).await?;
        let format = artifact.format(self.host);

        let dir = self
            .layout
            .new_staging_dir()
            .map_err(|e| ToolchainError::extraction_failed(format!("{e:#}")))?;
        tracing::debug!(staging = %dir.path().display(), ?format, "extracting archive");

        let dest = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || archive::extract_archive(&bytes, format, &dest))
            .await
            .map_err(|e| ToolchainError::extraction_failed(format!("extraction task failed: {e}")))?
            .map_err(|e| ToolchainError::extraction_failed(format!("{e:#}")))?;

        let executable = paths::find_executable(dir.path(), &self.executable_name).ok_or_else(|| {
            ToolchainError::extraction_failed(format!(
                "archive does not contain {}",
                self.executable_name
            ))
        })?;
        archive::set_executable(&executable)
            .map_err(|e| ToolchainError::extraction_failed(format!("{e:#}")))?;

        let reported = self
            .probe
            .query(&executable)
            .await
            .map_err(|msg| ToolchainError::version_mismatch(target_version, msg))?;
        if reported != *target_version {
            return Err(ToolchainError::version_mismatch(
                target_version,
                reported.to_string(),
            ));
        }

        let relative = executable
            .strip_prefix(dir.path())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&self.executable_name));

        Ok(StagedToolchain {
            dir,
            version: target_version.clone(),
            executable: relative,
            source_url,
        })
    }

    /// Tries each candidate URL until one yields bytes that pass the shasum
    /// and signature checks.
    async fn download_verified(&self, artifact: &Artifact) -> Result<(Vec<u8>, String)> {
        let filename = artifact.filename().to_string();
        let mut failures = Vec::new();

        for url in self.candidate_urls(artifact) {
            tracing::info!(%url, "downloading toolchain archive");
            match self.try_candidate(artifact, &url).await {
                Ok(bytes) => {
                    tracing::debug!(%url, bytes = bytes.len(), "archive verified");
                    return Ok((bytes, url));
                }
                Err(failure) => {
                    let (kind, msg) = match &failure {
                        CandidateFailure::Download(m) => ("download", m),
                        CandidateFailure::Signature(m) => ("signature", m),
                    };
                    tracing::warn!(%url, kind, "candidate rejected: {msg}");
                    failures.push((url, failure));
                }
            }
        }

        let signature_failures: Vec<String> = failures
            .iter()
            .filter_map(|(url, f)| match f {
                CandidateFailure::Signature(m) => Some(format!("{url}: {m}")),
                CandidateFailure::Download(_) => None,
            })
            .collect();
        if !signature_failures.is_empty() {
            return Err(ToolchainError::signature_invalid(
                filename,
                signature_failures.join("; "),
            ));
        }

        let messages: Vec<String> = failures
            .into_iter()
            .map(|(url, f)| match f {
                CandidateFailure::Download(m) | CandidateFailure::Signature(m) => {
                    format!("{url}: {m}")
                }
            })
            .collect();
        Err(ToolchainError::download_failed(messages.join("; ")))
    }

    async fn try_candidate(
        &self,
        artifact: &Artifact,
        url: &str,
    ) -> std::result::Result<Vec<u8>, CandidateFailure> {
        let bytes = self
            .downloader
            .fetch_bytes(url)
            .await
            .map_err(|e| CandidateFailure::Download(format!("{e:#}")))?;

        if let Some(expected) = artifact.size
            && expected != bytes.len() as u64
        {
            tracing::warn!(
                %url,
                expected,
                actual = bytes.len(),
                "archive size differs from index"
            );
        }

        if let Some(shasum) = &artifact.shasum {
            download::verify_checksum(&bytes, shasum)
                .map_err(|e| CandidateFailure::Download(format!("{e:#}")))?;
        }

        let signature_text = match artifact.signature_source() {
            SignatureSource::Inline(text) => text,
            SignatureSource::Url(sig_url) => {
                // a mirror hosts the signature next to its copy of the archive
                let sig_url = if artifact.signature.is_none() {
                    format!("{url}.minisig")
                } else {
                    sig_url
                };
                self.downloader
                    .fetch_text(&sig_url)
                    .await
                    .map_err(|e| CandidateFailure::Download(format!("signature: {e:#}")))?
            }
        };

        let signature = minisign::Signature::parse(&signature_text)
            .map_err(|e| CandidateFailure::Signature(e.to_string()))?;
        let verified = minisign::verify_detailed(&self.public_key, &bytes, &signature)
            .map_err(|e| CandidateFailure::Signature(e.to_string()))?;

        if let Some(signed_name) = verified.signed_file_name()
            && signed_name != artifact.filename()
        {
            return Err(CandidateFailure::Signature(format!(
                "signature is for {signed_name}, not {}",
                artifact.filename()
            )));
        }

        Ok(bytes)
    }

    /// Moves a staged toolchain into a new slot and makes it current.
    ///
    /// Until `current` is rewritten, the previous slot stays in place, so a
    /// reinstall of the current version never exposes a missing directory.
    /// Replaced slots and the previously current version are removed
    /// afterwards; failure to remove them is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// `Io` if the staged tree cannot be moved or `current` cannot be
    /// written.
    pub fn publish(&self, staged: StagedToolchain) -> Result<InstalledToolchain> {
        let StagedToolchain {
            dir,
            version,
            executable,
            source_url,
        } = staged;

        let previous = self.previous_current();
        let target = self
            .layout
            .publish_staged(dir, &version)
            .map_err(|e| layout_error("failed to publish toolchain", e))?;

        if let Err(e) = self
            .layout
            .write_metadata(&target, &ToolchainMetadata::now(source_url))
        {
            tracing::warn!("failed to write install metadata: {e:#}");
        }

        self.layout
            .set_current_slot(&target)
            .map_err(|e| layout_error("failed to update current version", e))?;
        tracing::info!(%version, slot = %target.display(), "toolchain installed");

        self.layout.retire_slots(&version, &target);
        self.remove_previous(previous.as_ref(), &version);

        Ok(InstalledToolchain {
            version,
            executable: target.join(executable),
        })
    }

    /// Makes an already-installed version current without downloading.
    ///
    /// Returns `None` when the version is not installed or its executable no
    /// longer answers the version query.
    ///
    /// # Errors
    ///
    /// `Io` if `current` cannot be written.
    pub async fn activate_installed(
        &self,
        version: &ToolchainVersion,
    ) -> Result<Option<InstalledToolchain>> {
        let Some(dir) = self.layout.slot_dir(version) else {
            return Ok(None);
        };
        let Some(executable) = paths::find_executable(&dir, &self.executable_name) else {
            tracing::warn!(%version, "installed toolchain has no executable, reinstalling");
            return Ok(None);
        };
        match self.probe.query(&executable).await {
            Ok(reported) if reported == *version => {}
            Ok(reported) => {
                tracing::warn!(%version, %reported, "installed toolchain reports another version");
                return Ok(None);
            }
            Err(msg) => {
                tracing::warn!(%version, "installed toolchain failed version query: {msg}");
                return Ok(None);
            }
        }

        let previous = self.previous_current();
        if self.layout.current_dir().ok().flatten().as_ref() != Some(&dir) {
            self.layout
                .set_current_slot(&dir)
                .map_err(|e| layout_error("failed to update current version", e))?;
            self.remove_previous(previous.as_ref(), version);
        }
        tracing::debug!(%version, "using installed toolchain");

        Ok(Some(InstalledToolchain {
            version: version.clone(),
            executable,
        }))
    }

    /// Installed versions, ascending.
    ///
    /// # Errors
    ///
    /// `Io` if the toolchains directory cannot be read.
    pub fn list_installed(&self) -> Result<Vec<ToolchainVersion>> {
        self.layout
            .list_installed()
            .map_err(|e| layout_error("failed to list toolchains", e))
    }

    /// # Errors
    ///
    /// `Io` if the `current` file is unreadable or corrupt.
    pub fn current_version(&self) -> Result<Option<ToolchainVersion>> {
        self.layout
            .current_version()
            .map_err(|e| layout_error("failed to read current version", e))
    }

    /// Removes an installed version. The current version cannot be removed.
    ///
    /// # Errors
    ///
    /// `Config` if the version is current or not installed, `Io` if removal
    /// fails.
    pub fn uninstall(&self, version: &ToolchainVersion) -> Result<()> {
        if self.current_version()?.as_ref() == Some(version) {
            return Err(ToolchainError::config(format!(
                "{version} is the current toolchain and cannot be uninstalled"
            )));
        }
        if !self.layout.is_installed(version) {
            return Err(ToolchainError::config(format!("{version} is not installed")));
        }
        self.layout
            .remove_version(version)
            .map_err(|e| layout_error("failed to uninstall toolchain", e))?;
        tracing::info!(%version, "toolchain uninstalled");
        Ok(())
    }

    fn previous_current(&self) -> Option<ToolchainVersion> {
        match self.layout.current_version() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("ignoring unreadable current version: {e:#}");
                None
            }
        }
    }

    fn remove_previous(&self, previous: Option<&ToolchainVersion>, now: &ToolchainVersion) {
        let Some(previous) = previous.filter(|p| *p != now) else {
            return;
        };
        match self.layout.remove_version(previous) {
            Ok(()) => tracing::debug!(%previous, "removed previous toolchain"),
            Err(e) => tracing::warn!(%previous, "failed to remove previous toolchain: {e:#}"),
        }
    }
}

fn layout_error(what: &str, e: anyhow::Error) -> ToolchainError {
    ToolchainError::io(format!("{what}: {e:#}"), std::io::Error::other(e))
}
