//! Shared fixtures: a throwaway minisign key, fake toolchain archives, and
//! release indexes served by wiremock.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;
use toolpin_engine::minisign::PublicKey;
use toolpin_engine::{EngineConfig, HostTarget};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KEY_ID: [u8; 8] = [0x42, 0x17, 0, 1, 2, 3, 4, 5];

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[9u8; 32])
}

/// Minisign public key text for [`signing_key`].
pub fn public_key() -> String {
    let pk = PublicKey::from_parts(KEY_ID, signing_key().verifying_key().to_bytes());
    format!("untrusted comment: toolpin test key\n{}\n", pk.to_base64())
}

/// Prehashed minisign signature over `bytes` naming `file_name`.
pub fn sign(bytes: &[u8], file_name: &str) -> String {
    let key = signing_key();
    let sig = key.sign(&Blake2b512::digest(bytes)).to_bytes();

    let mut blob = Vec::with_capacity(74);
    blob.extend_from_slice(b"ED");
    blob.extend_from_slice(&KEY_ID);
    blob.extend_from_slice(&sig);

    let comment = format!("timestamp:1717718400\tfile:{file_name}\thashed");
    let mut covered = sig.to_vec();
    covered.extend_from_slice(comment.as_bytes());
    let global = key.sign(&covered).to_bytes();

    format!(
        "untrusted comment: signature from toolpin test key\n{}\ntrusted comment: {comment}\n{}\n",
        STANDARD.encode(&blob),
        STANDARD.encode(global)
    )
}

pub fn host() -> HostTarget {
    HostTarget::detect().expect("test host is supported")
}

pub fn archive_name(version: &str) -> String {
    format!("zig-{}-{version}.tar.xz", host().triple())
}

/// A tar.xz holding `zig-<host>-<version>/zig`, a script that prints
/// `reported`.
pub fn toolchain_archive(version: &str, reported: &str) -> Vec<u8> {
    let script = format!("#!/bin/sh\necho {reported}\n");
    let encoder = xz2::write::XzEncoder::new(Vec::new(), 1);
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(
            &mut header,
            format!("zig-{}-{version}/zig", host().triple()),
            script.as_bytes(),
        )
        .unwrap();

    let mut readme = tar::Header::new_gnu();
    readme.set_size(5);
    readme.set_mode(0o644);
    readme.set_cksum();
    builder
        .append_data(
            &mut readme,
            format!("zig-{}-{version}/README", host().triple()),
            &b"hello"[..],
        )
        .unwrap();

    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

/// One release as served by a test server.
pub struct Release {
    pub version: String,
    pub archive: Vec<u8>,
    pub signature: String,
}

impl Release {
    /// A well-formed, correctly signed release.
    pub fn good(version: &str) -> Self {
        let archive = toolchain_archive(version, version);
        let signature = sign(&archive, &archive_name(version));
        Self {
            version: version.to_string(),
            archive,
            signature,
        }
    }

    /// The same release with one signature byte flipped.
    pub fn corrupted_signature(version: &str) -> Self {
        let mut release = Self::good(version);
        let lines: Vec<&str> = release.signature.lines().collect();
        let mut blob = STANDARD.decode(lines[1]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        release.signature = format!(
            "{}\n{}\n{}\n{}\n",
            lines[0],
            STANDARD.encode(blob),
            lines[2],
            lines[3]
        );
        release
    }
}

/// Index JSON listing `releases`, with tarballs under `base`.
pub fn index_json(base: &str, releases: &[&Release]) -> serde_json::Value {
    let mut index = serde_json::Map::new();
    for release in releases {
        let name = archive_name(&release.version);
        index.insert(
            release.version.clone(),
            json!({
                "date": "2024-06-07",
                host().triple(): {
                    "tarball": format!("{base}/{name}"),
                    "shasum": toolpin_engine::download::compute_sha256(&release.archive),
                    "size": release.archive.len().to_string(),
                }
            }),
        );
    }
    serde_json::Value::Object(index)
}

/// Serves the archive and its `.minisig` for `release` under `prefix`.
pub async fn mount_release(server: &MockServer, prefix: &str, release: &Release) {
    let name = archive_name(&release.version);
    Mock::given(method("GET"))
        .and(path(format!("{prefix}/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(release.archive.clone()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{prefix}/{name}.minisig")))
        .respond_with(ResponseTemplate::new(200).set_body_string(release.signature.clone()))
        .mount(server)
        .await;
}

/// Config reading stable releases from `<server>/index.json` and nightly
/// builds from `<server>/nightly.json`, trusting the test key, with short
/// timings.
pub fn config(home: &Path, server: &MockServer) -> EngineConfig {
    let mut config = EngineConfig::with_home(home);
    config.stable_index_url = format!("{}/index.json", server.uri());
    config.nightly_index_url = format!("{}/nightly.json", server.uri());
    config.trusted_public_key = public_key();
    config.request_timeout_secs = 5;
    config.download_timeout_secs = 5;
    config.debounce_ms = 50;
    config
}

/// Names of the directories under `<home>/toolchains`.
pub fn installed_dirs(home: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(home.join("toolchains")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
