//! Installer behavior against a mock release server.
//!
//! The fake toolchains are shell scripts, so these tests only run on unix.

#![cfg(unix)]

mod common;

use std::time::Duration;

use toolpin_engine::download::{Downloader, compute_sha256};
use toolpin_engine::{Artifact, FailureKind, Installer, ReleaseEntry, ToolchainVersion};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{Release, archive_name, host, installed_dirs, mount_release};

fn version(s: &str) -> ToolchainVersion {
    ToolchainVersion::parse(s).unwrap()
}

fn entry_for(base: &str, release: &Release) -> (ReleaseEntry, Artifact) {
    let mut artifact = Artifact::new(format!("{base}/{}", archive_name(&release.version)));
    artifact.shasum = Some(compute_sha256(&release.archive));
    artifact.size = Some(release.archive.len() as u64);
    let entry =
        ReleaseEntry::new(version(&release.version)).with_artifact(host().triple(), artifact.clone());
    (entry, artifact)
}

fn installer(home: &std::path::Path, server: &MockServer, mirrors: &[&str]) -> Installer {
    let mut config = common::config(home, server);
    config.mirrors = mirrors
        .iter()
        .map(|m| format!("{}{m}", server.uri()))
        .collect();
    Installer::new(&config, host())
        .unwrap()
        .with_downloader(
            Downloader::new(Duration::from_secs(5))
                .unwrap()
                .with_retry(1, Duration::ZERO),
        )
}

#[tokio::test]
async fn install_publishes_and_points_current_at_new_version() {
    let server = MockServer::start().await;
    let release = Release::good("0.13.0");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);

    let installed = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();

    assert_eq!(installed.version, version("0.13.0"));
    assert_eq!(
        installed.executable,
        home.path().join("toolchains").join("0.13.0").join("zig")
    );
    assert_eq!(installed_dirs(home.path()), ["0.13.0"]);
    assert_eq!(installer.current_version().unwrap(), Some(version("0.13.0")));

    let metadata = installer.layout().read_metadata(&version("0.13.0")).unwrap();
    assert!(metadata.source_url.ends_with(&archive_name("0.13.0")));
}

#[tokio::test]
async fn archive_missing_upstream_is_fetched_from_mirror() {
    let server = MockServer::start().await;
    let release = Release::good("0.13.0");
    mount_release(&server, "/mirror", &release).await;
    Mock::given(method("GET"))
        .and(path(format!("/dl/{}", archive_name("0.13.0"))))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &["/mirror"]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);

    let installed = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();

    assert_eq!(installed.version, version("0.13.0"));
    let metadata = installer.layout().read_metadata(&version("0.13.0")).unwrap();
    assert!(metadata.source_url.contains("/mirror/"));
    server.verify().await;
}

#[tokio::test]
async fn bad_signature_upstream_is_reverified_from_mirror() {
    let server = MockServer::start().await;
    let good = Release::good("0.13.0");
    let tampered = Release {
        version: good.version.clone(),
        archive: good.archive.clone(),
        signature: Release::corrupted_signature("0.13.0").signature,
    };
    mount_release(&server, "/dl", &tampered).await;
    mount_release(&server, "/mirror", &good).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &["/mirror"]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &good);

    let installed = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();

    assert_eq!(installed.version, version("0.13.0"));
}

#[tokio::test]
async fn corrupted_signature_everywhere_installs_nothing() {
    let server = MockServer::start().await;
    let release = Release::corrupted_signature("0.13.0");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);

    let err = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::SignatureInvalid);
    assert!(installed_dirs(home.path()).is_empty());
    assert_eq!(installer.current_version().unwrap(), None);
    // the archive was never extracted
    assert!(!home.path().join("staging").exists());
}

#[tokio::test]
async fn shasum_mismatch_is_a_download_failure() {
    let server = MockServer::start().await;
    let release = Release::good("0.13.0");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, mut artifact) = entry_for(&format!("{}/dl", server.uri()), &release);
    artifact.shasum = Some(compute_sha256(b"something else"));

    let err = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::DownloadFailed);
    assert!(err.to_string().contains("checksum mismatch"));
    assert!(installed_dirs(home.path()).is_empty());
}

#[tokio::test]
async fn mislabeled_release_is_a_version_mismatch() {
    let server = MockServer::start().await;
    let archive = common::toolchain_archive("0.13.0", "0.12.0");
    let release = Release {
        version: "0.13.0".into(),
        signature: common::sign(&archive, &archive_name("0.13.0")),
        archive,
    };
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);

    let err = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::VersionMismatch);
    assert!(err.to_string().contains("0.12.0"));
    assert!(installed_dirs(home.path()).is_empty());
    let staging: Vec<_> = std::fs::read_dir(home.path().join("staging"))
        .unwrap()
        .collect();
    assert!(staging.is_empty(), "staging not cleaned: {staging:?}");
}

#[tokio::test]
async fn signature_for_another_file_is_rejected() {
    let server = MockServer::start().await;
    let mut release = Release::good("0.13.0");
    release.signature = common::sign(&release.archive, "zig-evil.tar.xz");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);

    let err = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::SignatureInvalid);
    assert!(err.to_string().contains("zig-evil.tar.xz"));
}

#[tokio::test]
async fn interrupted_install_leaves_previous_toolchain_current() {
    let server = MockServer::start().await;
    let old = Release::good("0.12.0");
    let new = Release::good("0.13.0");
    mount_release(&server, "/dl", &old).await;
    mount_release(&server, "/dl", &new).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let base = format!("{}/dl", server.uri());

    let (entry, artifact) = entry_for(&base, &old);
    installer
        .install(&entry, &artifact, &version("0.12.0"))
        .await
        .unwrap();

    // extracted and probed, then the process dies before publish
    let (entry, artifact) = entry_for(&base, &new);
    let staged = installer
        .stage(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    let staged_path = staged.path().to_path_buf();
    assert!(staged_path.join("zig").is_file());
    std::mem::forget(staged);

    assert_eq!(installer.current_version().unwrap(), Some(version("0.12.0")));
    assert_eq!(installed_dirs(home.path()), ["0.12.0"]);
    assert!(!staged_path.starts_with(home.path().join("toolchains")));

    // a later run still succeeds
    let (entry, artifact) = entry_for(&base, &new);
    installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    assert_eq!(installer.current_version().unwrap(), Some(version("0.13.0")));
}

#[tokio::test]
async fn dropped_stage_is_removed_and_publish_retires_previous() {
    let server = MockServer::start().await;
    let old = Release::good("0.12.0");
    let new = Release::good("0.13.0");
    mount_release(&server, "/dl", &old).await;
    mount_release(&server, "/dl", &new).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let base = format!("{}/dl", server.uri());

    let (entry, artifact) = entry_for(&base, &old);
    installer
        .install(&entry, &artifact, &version("0.12.0"))
        .await
        .unwrap();

    let (entry, artifact) = entry_for(&base, &new);
    let staged = installer
        .stage(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    let staged_path = staged.path().to_path_buf();
    drop(staged);
    assert!(!staged_path.exists());

    let staged = installer
        .stage(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    let installed = installer.publish(staged).unwrap();

    assert!(installed.executable.is_file());
    assert_eq!(installed_dirs(home.path()), ["0.13.0"]);
    assert_eq!(installer.list_installed().unwrap(), [version("0.13.0")]);
}

#[tokio::test]
async fn activate_installed_repoints_current_without_download() {
    let server = MockServer::start().await;
    let release = Release::good("0.13.0");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);
    installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    std::fs::remove_file(installer.layout().current_file()).unwrap();

    let activated = installer
        .activate_installed(&version("0.13.0"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(activated.version, version("0.13.0"));
    assert_eq!(installer.current_version().unwrap(), Some(version("0.13.0")));
    assert!(
        installer
            .activate_installed(&version("0.11.0"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn reinstalling_broken_current_version_swaps_slots() {
    let server = MockServer::start().await;
    let release = Release::good("0.13.0");
    mount_release(&server, "/dl", &release).await;

    let home = tempfile::tempdir().unwrap();
    let installer = installer(home.path(), &server, &[]);
    let (entry, artifact) = entry_for(&format!("{}/dl", server.uri()), &release);
    let first = installer
        .install(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    std::fs::write(&first.executable, "#!/bin/sh\necho garbage\n").unwrap();

    assert!(
        installer
            .activate_installed(&version("0.13.0"))
            .await
            .unwrap()
            .is_none()
    );

    // published next to the live slot; current still names the old one
    let staged = installer
        .stage(&entry, &artifact, &version("0.13.0"))
        .await
        .unwrap();
    let old_dir = home.path().join("toolchains").join("0.13.0");
    assert_eq!(installer.layout().current_dir().unwrap(), Some(old_dir.clone()));
    assert!(old_dir.is_dir());

    let second = installer.publish(staged).unwrap();

    assert_ne!(second.executable, first.executable);
    assert!(second.executable.is_file());
    assert!(!old_dir.exists());
    assert_eq!(installer.current_version().unwrap(), Some(version("0.13.0")));
    assert_eq!(
        installer.layout().current_dir().unwrap().as_deref(),
        second.executable.parent()
    );
    assert_eq!(installer.list_installed().unwrap(), [version("0.13.0")]);

    // the repaired slot is reused without a download
    let activated = installer
        .activate_installed(&version("0.13.0"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(activated.executable, second.executable);
}
