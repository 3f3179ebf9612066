//! Archive extraction for downloaded toolchain releases.
//!
//! Archives are extracted straight from the verified in-memory bytes, so the
//! content that was signature-checked is exactly the content that lands on
//! disk. Supported formats are xz- and gzip-compressed tarballs and ZIP.
//!
//! Release archives wrap everything in a single top-level folder
//! (`zig-linux-x86_64-0.13.0/zig`). When every entry shares such a folder it
//! is stripped, so the executable ends up at the root of the destination.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;

/// Compression/container format of a release archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarXz,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Guesses the format from a URL or file name.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let name = url.split(['?', '#']).next().unwrap_or(url);
        if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Extracts `bytes` into `dest_dir`, creating it if needed.
///
/// # Errors
///
/// Returns an error if the archive is corrupt, contains an absolute or
/// parent-relative path, or a file cannot be written.
pub fn extract_archive(bytes: &[u8], format: ArchiveFormat, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    match format {
        ArchiveFormat::TarXz => {
            extract_tar(|| XzDecoder::new(Cursor::new(bytes)), dest_dir)
        }
        ArchiveFormat::TarGz => {
            extract_tar(|| GzDecoder::new(Cursor::new(bytes)), dest_dir)
        }
        ArchiveFormat::Zip => extract_zip(bytes, dest_dir),
    }
}

/// Rejects absolute paths and `..` components.
fn check_entry_path(path: &Path) -> Result<()> {
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        bail!(
            "Refusing to extract path with parent directory or absolute reference: {}",
            path.display()
        );
    }
    Ok(())
}

/// Rejects a symlink at `link` whose `target` would resolve outside the
/// destination root. `link` is relative to that root.
fn check_link_target(link: &Path, target: &Path) -> Result<()> {
    let escapes = || {
        anyhow::anyhow!(
            "Refusing to extract link {} pointing outside the archive: {}",
            link.display(),
            target.display()
        )
    };
    if target.has_root()
        || target
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(escapes());
    }

    let mut depth = link.parent().map_or(0, |p| normalize(p).components().count());
    for component in target.components() {
        match component {
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escapes)?,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    Ok(())
}

/// Drops `.` components so `./zig` and `zig` are treated alike.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn relative_to_root(entry_path: &Path, strip_prefix: Option<&Path>) -> Option<PathBuf> {
    let relative = match strip_prefix {
        Some(prefix) => match entry_path.strip_prefix(prefix) {
            Ok(p) => p.to_path_buf(),
            Err(_) => entry_path.to_path_buf(),
        },
        None => entry_path.to_path_buf(),
    };
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Tracks whether every entry shares one top-level folder.
///
/// Only a folder with nested entries counts; a flat archive holding a single
/// file keeps that file.
#[derive(Default)]
struct CommonRoot {
    root: Option<PathBuf>,
    nested: bool,
    diverged: bool,
}

impl CommonRoot {
    fn observe(&mut self, path: &Path) {
        if self.diverged {
            return;
        }
        if path.components().count() > 1 {
            self.nested = true;
        }
        let Some(first) = path.components().next() else {
            return;
        };
        let first = PathBuf::from(first.as_os_str());
        match &self.root {
            None => self.root = Some(first),
            Some(existing) if *existing != first => self.diverged = true,
            Some(_) => {}
        }
    }

    fn finish(self) -> Option<PathBuf> {
        if self.diverged || !self.nested {
            None
        } else {
            self.root
        }
    }
}

fn extract_tar<R, F>(open: F, dest_dir: &Path) -> Result<()>
where
    R: Read,
    F: Fn() -> R,
{
    let mut common = CommonRoot::default();
    let mut scan = Archive::new(open());
    for entry in scan.entries().context("Failed to read tar entries")? {
        let entry = entry.context("Failed to read tar entry")?;
        let path = entry.path().context("Failed to get entry path")?;
        common.observe(&normalize(&path));
    }
    let strip_prefix = common.finish();

    let mut archive = Archive::new(open());
    for entry in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let raw_path = entry.path().context("Failed to get entry path")?.into_owned();
        check_entry_path(&raw_path)?;

        let Some(relative) = relative_to_root(&normalize(&raw_path), strip_prefix.as_deref())
        else {
            continue;
        };
        let output_path = dest_dir.join(&relative);

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
        } else {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }

            let kind = entry.header().entry_type();
            if kind.is_symlink() || kind.is_hard_link() {
                let target = entry
                    .link_name()
                    .context("Failed to read link target")?
                    .with_context(|| format!("Link without target: {}", raw_path.display()))?
                    .into_owned();
                if kind.is_hard_link() {
                    // hard link targets name another entry of the same archive
                    check_entry_path(&target)?;
                    let source = relative_to_root(&normalize(&target), strip_prefix.as_deref())
                        .with_context(|| format!("Invalid hard link target: {}", target.display()))?;
                    let source = dest_dir.join(source);
                    std::fs::hard_link(&source, &output_path).with_context(|| {
                        format!(
                            "Failed to link {} to {}",
                            output_path.display(),
                            source.display()
                        )
                    })?;
                    continue;
                }
                check_link_target(&relative, &target)?;
            }

            entry
                .unpack(&output_path)
                .with_context(|| format!("Failed to extract: {}", output_path.display()))?;
        }
    }

    Ok(())
}

fn extract_zip(bytes: &[u8], dest_dir: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to read ZIP archive")?;

    let mut common = CommonRoot::default();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;
        let path = entry
            .enclosed_name()
            .with_context(|| format!("Invalid entry path in archive: entry {i}"))?;
        common.observe(&normalize(&path));
    }
    let strip_prefix = common.finish();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {i}"))?;
        let entry_path = entry
            .enclosed_name()
            .with_context(|| format!("Invalid entry path in archive: entry {i}"))?;
        check_entry_path(&entry_path)?;

        let Some(relative) = relative_to_root(&normalize(&entry_path), strip_prefix.as_deref())
        else {
            continue;
        };
        let output_path = dest_dir.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path).with_context(|| {
                format!("Failed to create directory: {}", output_path.display())
            })?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut outfile = std::fs::File::create(&output_path)
            .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract: {}", output_path.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&output_path, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("Failed to set permissions: {}", output_path.display()))?;
        }
    }

    Ok(())
}

/// Marks `path` executable (0o755). No-op on Windows.
///
/// # Errors
///
/// Returns an error if the permissions cannot be read or changed.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)
        .with_context(|| format!("Failed to get metadata: {}", path.display()))?
        .permissions();
    if perms.mode() & 0o111 == 0o111 {
        return Ok(());
    }
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))
}

/// Marks `path` executable (0o755). No-op on Windows.
#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
