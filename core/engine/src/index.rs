//! Release index retrieval and querying.
//!
//! ## Index Format
//!
//! The index is a JSON object keyed by version. Each version object holds
//! string metadata and, per host triple, an artifact object:
//!
//! ```json
//! {
//!   "master": {
//!     "version": "0.14.0-dev.3008+7cef585f5",
//!     "date": "2024-06-30",
//!     "x86_64-linux": {
//!       "tarball": "https://ziglang.org/builds/zig-linux-x86_64-0.14.0-dev.3008+7cef585f5.tar.xz",
//!       "shasum": "2f1e...",
//!       "size": "47265428"
//!     }
//!   },
//!   "0.13.0": {
//!     "date": "2024-06-07",
//!     "x86_64-linux": { "tarball": "https://...", "shasum": "...", "size": "47082308" }
//!   }
//! }
//! ```
//!
//! A key that is not a version (`master`) is an alias and must carry a
//! `version` string. Parsing is strict: one malformed entry rejects the whole
//! document, and the fetcher moves on to the next source.
//!
//! ## Sources
//!
//! Each channel has a canonical URL. When it fails (network error, timeout,
//! non-2xx status, unparsable body) every configured mirror is tried in order
//! as `<mirror>/index.json`, one attempt each.

use std::collections::btree_map::{self, BTreeMap};
use std::collections::hash_map::{Entry, HashMap};
use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::{Map, Value};

use crate::archive::ArchiveFormat;
use crate::config::EngineConfig;
use crate::error::{Result, ToolchainError};
use crate::platform::HostTarget;
use crate::version::{Channel, ToolchainVersion};

/// User-Agent header for HTTP requests.
pub(crate) const USER_AGENT: &str = concat!("toolpin/", env!("CARGO_PKG_VERSION"));

/// File name appended to mirror base URLs.
const MIRROR_INDEX_PATH: &str = "index.json";

/// Where an artifact's minisign signature comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSource {
    /// Signature text embedded in the index.
    Inline(String),
    /// Signature file to download.
    Url(String),
}

/// One downloadable archive for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub tarball: String,
    /// Lowercase hex SHA-256 of the archive.
    pub shasum: Option<String>,
    /// Advisory byte size.
    pub size: Option<u64>,
    pub signature: Option<SignatureSource>,
}

impl Artifact {
    /// Creates an artifact with only a tarball URL.
    #[must_use]
    pub fn new(tarball: impl Into<String>) -> Self {
        Self {
            tarball: tarball.into(),
            shasum: None,
            size: None,
            signature: None,
        }
    }

    /// Last path segment of the tarball URL.
    ///
    /// Example: `"https://.../zig-linux-x86_64-0.13.0.tar.xz"` -> `"zig-linux-x86_64-0.13.0.tar.xz"`
    #[must_use]
    pub fn filename(&self) -> &str {
        let path = self.tarball.split(['?', '#']).next().unwrap_or(&self.tarball);
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Signature location, defaulting to `<tarball>.minisig`.
    #[must_use]
    pub fn signature_source(&self) -> SignatureSource {
        self.signature
            .clone()
            .unwrap_or_else(|| SignatureSource::Url(format!("{}.minisig", self.tarball)))
    }

    /// Archive format implied by the URL, or the host default.
    #[must_use]
    pub fn format(&self, host: HostTarget) -> ArchiveFormat {
        ArchiveFormat::from_url(&self.tarball).unwrap_or_else(|| host.default_archive_format())
    }
}

/// A single version's release data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEntry {
    pub version: ToolchainVersion,
    pub date: Option<String>,
    /// Artifacts keyed by host triple (`x86_64-linux`).
    pub artifacts: BTreeMap<String, Artifact>,
}

impl ReleaseEntry {
    #[must_use]
    pub fn new(version: ToolchainVersion) -> Self {
        Self {
            version,
            date: None,
            artifacts: BTreeMap::new(),
        }
    }

    /// Adds an artifact for `host`, replacing any existing one.
    #[must_use]
    pub fn with_artifact(mut self, host: impl Into<String>, artifact: Artifact) -> Self {
        self.artifacts.insert(host.into(), artifact);
        self
    }

    #[must_use = "returns artifact info without side effects"]
    pub fn artifact_for(&self, host: HostTarget) -> Option<&Artifact> {
        self.artifacts.get(&host.triple())
    }

    /// Host triples this release ships for, sorted.
    #[must_use]
    pub fn available_hosts(&self) -> Vec<&str> {
        self.artifacts.keys().map(String::as_str).collect()
    }
}

/// Parsed release index, ordered by version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseIndex {
    entries: BTreeMap<ToolchainVersion, ReleaseEntry>,
}

impl ReleaseIndex {
    /// Parses an index document.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let root: Value = serde_json::from_str(text).context("index is not valid JSON")?;
        let Value::Object(versions) = root else {
            bail!("index must be a JSON object");
        };

        let mut index = Self::default();
        for (key, value) in versions {
            let Value::Object(fields) = value else {
                bail!("entry {key:?} must be an object");
            };
            let entry = parse_entry(&key, &fields)?;
            index.insert(entry);
        }
        Ok(index)
    }

    pub fn insert(&mut self, entry: ReleaseEntry) {
        self.entries.insert(entry.version.clone(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending version order.
    pub fn iter(&self) -> btree_map::Values<'_, ToolchainVersion, ReleaseEntry> {
        self.entries.values()
    }

    #[must_use = "returns version info without side effects"]
    pub fn find(&self, version: &ToolchainVersion) -> Option<&ReleaseEntry> {
        self.entries.get(version)
    }

    /// Highest release without a pre-release tag.
    #[must_use = "returns version info without side effects"]
    pub fn latest_stable(&self) -> Option<&ReleaseEntry> {
        self.entries.values().rev().find(|e| !e.version.is_dev())
    }

    /// Highest development build.
    #[must_use = "returns version info without side effects"]
    pub fn latest_nightly(&self) -> Option<&ReleaseEntry> {
        self.entries.values().rev().find(|e| e.version.is_dev())
    }

    /// All entries, newest first.
    #[must_use = "returns sorted version list without side effects"]
    pub fn sorted_versions(&self) -> Vec<&ReleaseEntry> {
        self.entries.values().rev().collect()
    }

    /// Stable entries at or above `min`, newest first.
    pub fn satisfying<'a>(
        &'a self,
        min: &ToolchainVersion,
    ) -> impl Iterator<Item = &'a ReleaseEntry> + use<'a> {
        self.entries
            .range(min.clone()..)
            .rev()
            .map(|(_, entry)| entry)
            .filter(|e| !e.version.is_dev())
    }
}

impl FromIterator<ReleaseEntry> for ReleaseIndex {
    fn from_iter<I: IntoIterator<Item = ReleaseEntry>>(iter: I) -> Self {
        let mut index = Self::default();
        for entry in iter {
            index.insert(entry);
        }
        index
    }
}

fn parse_entry(key: &str, fields: &Map<String, Value>) -> anyhow::Result<ReleaseEntry> {
    let version = match ToolchainVersion::parse(key) {
        Ok(v) => v,
        Err(_) => {
            let Some(Value::String(raw)) = fields.get("version") else {
                bail!("alias {key:?} must carry a \"version\" string");
            };
            ToolchainVersion::parse(raw)
                .with_context(|| format!("alias {key:?} has invalid version {raw:?}"))?
        }
    };

    let mut entry = ReleaseEntry::new(version);
    for (name, value) in fields {
        match value {
            Value::String(s) => {
                if name == "date" {
                    entry.date = Some(s.clone());
                }
            }
            Value::Object(obj) => {
                let artifact = parse_artifact(obj)
                    .with_context(|| format!("entry {key:?}, artifact {name:?}"))?;
                entry.artifacts.insert(name.clone(), artifact);
            }
            other => bail!(
                "entry {key:?}, field {name:?}: expected a string or object, got {}",
                json_type(other)
            ),
        }
    }
    Ok(entry)
}

fn parse_artifact(obj: &Map<String, Value>) -> anyhow::Result<Artifact> {
    let Some(Value::String(tarball)) = obj.get("tarball") else {
        bail!("missing \"tarball\" string");
    };

    let shasum = match obj.get("shasum") {
        None => None,
        Some(Value::String(s)) => Some(s.to_ascii_lowercase()),
        Some(other) => bail!("\"shasum\" must be a string, got {}", json_type(other)),
    };

    let size = match obj.get("size") {
        None => None,
        Some(Value::Number(n)) => Some(n.as_u64().context("\"size\" must be a non-negative integer")?),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<u64>()
                .with_context(|| format!("\"size\" {s:?} is not a byte count"))?,
        ),
        Some(other) => bail!("\"size\" must be a number, got {}", json_type(other)),
    };

    let signature = match obj.get("signature") {
        None => None,
        Some(Value::String(s)) if s.starts_with("http://") || s.starts_with("https://") => {
            Some(SignatureSource::Url(s.clone()))
        }
        Some(Value::String(s)) => Some(SignatureSource::Inline(s.clone())),
        Some(other) => bail!("\"signature\" must be a string, got {}", json_type(other)),
    };

    Ok(Artifact {
        tarball: tarball.clone(),
        shasum,
        size,
        signature,
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Handles HTTP errors with readable messages.
fn handle_http_error(status: reqwest::StatusCode, url: &str) -> anyhow::Error {
    match status.as_u16() {
        404 => anyhow::anyhow!("release index not found at {url}"),
        code if code >= 500 => anyhow::anyhow!("server error ({code}): {url}"),
        code => anyhow::anyhow!("HTTP error {code}: {url}"),
    }
}

/// Fetches release indexes from the canonical source with mirror fallback.
#[derive(Debug, Clone)]
pub struct IndexFetcher {
    client: reqwest::Client,
    stable_url: String,
    nightly_url: String,
    mirrors: Vec<String>,
    timeout: Duration,
}

impl IndexFetcher {
    /// # Errors
    ///
    /// Returns a `Config` error if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ToolchainError::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            stable_url: config.index_url(Channel::Stable).to_string(),
            nightly_url: config.index_url(Channel::Nightly).to_string(),
            mirrors: config.mirrors.clone(),
            timeout: config.request_timeout(),
        })
    }

    /// Source URLs for `channel`, in the order they are tried.
    #[must_use]
    pub fn sources(&self, channel: Channel) -> Vec<String> {
        let canonical = match channel {
            Channel::Stable => &self.stable_url,
            Channel::Nightly => &self.nightly_url,
        };
        std::iter::once(canonical.clone())
            .chain(self.mirrors.iter().map(|m| {
                format!("{}/{MIRROR_INDEX_PATH}", m.trim_end_matches('/'))
            }))
            .collect()
    }

    /// Fetches and parses the index for `channel`.
    ///
    /// The first source that yields a valid index wins; later sources are
    /// not contacted.
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` listing every source's failure.
    pub async fn fetch_index(&self, channel: Channel) -> Result<ReleaseIndex> {
        let mut attempts = Vec::new();
        for (i, url) in self.sources(channel).into_iter().enumerate() {
            tracing::debug!(%channel, source = %url, "fetching release index");
            match self.fetch_one(&url).await {
                Ok(index) => {
                    if i > 0 {
                        tracing::info!(%channel, mirror = %url, "release index served by mirror");
                    }
                    tracing::debug!(%channel, releases = index.len(), "release index loaded");
                    return Ok(index);
                }
                Err(e) => {
                    tracing::warn!(%channel, source = %url, "release index source failed: {e:#}");
                    attempts.push(format!("{url}: {e:#}"));
                }
            }
        }
        Err(ToolchainError::index_unavailable(channel, attempts))
    }

    async fn fetch_one(&self, url: &str) -> anyhow::Result<ReleaseIndex> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("failed to connect to {url}"))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response.status(), url));
        }

        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read response from {url}"))?;

        ReleaseIndex::parse(&text)
    }
}

/// Per-run cache so each channel's index is fetched at most once.
#[derive(Debug)]
pub struct FetchSession<'a> {
    fetcher: &'a IndexFetcher,
    cache: HashMap<Channel, ReleaseIndex>,
}

impl<'a> FetchSession<'a> {
    #[must_use]
    pub fn new(fetcher: &'a IndexFetcher) -> Self {
        Self {
            fetcher,
            cache: HashMap::new(),
        }
    }

    /// Returns the index for `channel`, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Propagates `IndexUnavailable` from the fetcher. Failures are not cached.
    pub async fn index(&mut self, channel: Channel) -> Result<&ReleaseIndex> {
        let fetcher = self.fetcher;
        match self.cache.entry(channel) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let index = fetcher.fetch_index(channel).await?;
                Ok(entry.insert(index))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ToolchainVersion {
        ToolchainVersion::parse(s).unwrap()
    }

    fn sample_index_json() -> &'static str {
        r#"{
            "master": {
                "version": "0.14.0-dev.3008+7cef585f5",
                "date": "2024-06-30",
                "x86_64-linux": {
                    "tarball": "https://ziglang.org/builds/zig-linux-x86_64-0.14.0-dev.3008+7cef585f5.tar.xz",
                    "shasum": "AB12",
                    "size": "47265428"
                }
            },
            "0.13.0": {
                "date": "2024-06-07",
                "docs": "https://ziglang.org/documentation/0.13.0/",
                "x86_64-linux": {
                    "tarball": "https://ziglang.org/download/0.13.0/zig-linux-x86_64-0.13.0.tar.xz",
                    "size": 47082308
                },
                "x86_64-windows": {
                    "tarball": "https://ziglang.org/download/0.13.0/zig-windows-x86_64-0.13.0.zip",
                    "signature": "https://sigs.example/zig-windows-x86_64-0.13.0.zip.minisig"
                }
            },
            "0.12.1": {
                "x86_64-linux": {
                    "tarball": "https://ziglang.org/download/0.12.1/zig-linux-x86_64-0.12.1.tar.xz",
                    "signature": "untrusted comment: x\nRUQ=\n"
                }
            }
        }"#
    }

    #[test]
    fn parses_versions_aliases_and_artifacts() {
        let index = ReleaseIndex::parse(sample_index_json()).unwrap();

        assert_eq!(index.len(), 3);
        let nightly = index.latest_nightly().unwrap();
        assert_eq!(nightly.version, v("0.14.0-dev.3008+7cef585f5"));
        assert_eq!(nightly.date.as_deref(), Some("2024-06-30"));
        let artifact = &nightly.artifacts["x86_64-linux"];
        assert_eq!(artifact.shasum.as_deref(), Some("ab12"));
        assert_eq!(artifact.size, Some(47_265_428));

        let stable = index.latest_stable().unwrap();
        assert_eq!(stable.version, v("0.13.0"));
        assert_eq!(stable.artifacts["x86_64-linux"].size, Some(47_082_308));
        assert_eq!(stable.available_hosts(), ["x86_64-linux", "x86_64-windows"]);
    }

    #[test]
    fn signature_sources() {
        let index = ReleaseIndex::parse(sample_index_json()).unwrap();
        let stable = index.find(&v("0.13.0")).unwrap();

        assert_eq!(
            stable.artifacts["x86_64-linux"].signature_source(),
            SignatureSource::Url(
                "https://ziglang.org/download/0.13.0/zig-linux-x86_64-0.13.0.tar.xz.minisig".into()
            )
        );
        assert!(matches!(
            stable.artifacts["x86_64-windows"].signature_source(),
            SignatureSource::Url(u) if u.starts_with("https://sigs.example/")
        ));
        assert!(matches!(
            index.find(&v("0.12.1")).unwrap().artifacts["x86_64-linux"].signature_source(),
            SignatureSource::Inline(_)
        ));
    }

    #[test]
    fn sorted_and_satisfying_queries() {
        let index = ReleaseIndex::parse(sample_index_json()).unwrap();

        let sorted: Vec<String> = index
            .sorted_versions()
            .iter()
            .map(|e| e.version.to_string())
            .collect();
        assert_eq!(sorted, ["0.14.0-dev.3008+7cef585f5", "0.13.0", "0.12.1"]);

        let min = v("0.12.5");
        let ok: Vec<_> = index.satisfying(&min).map(|e| e.version.clone()).collect();
        assert_eq!(ok, [v("0.13.0")]);
    }

    #[test]
    fn strict_parsing_rejects_whole_document() {
        for bad in [
            "[]",
            r#"{"0.13.0": []}"#,
            r#"{"master": {"date": "2024-01-01"}}"#,
            r#"{"0.13.0": {"x86_64-linux": {"shasum": "ab"}}}"#,
            r#"{"0.13.0": {"x86_64-linux": {"tarball": "u", "size": "big"}}}"#,
            r#"{"0.13.0": {"x86_64-linux": {"tarball": "u", "size": -1}}}"#,
            r#"{"0.13.0": {"notes": 5}}"#,
            r#"{"0.13.0": {}, "nightly": {"version": "not-a-version"}}"#,
            "{ truncated",
        ] {
            assert!(ReleaseIndex::parse(bad).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn artifact_filename_and_format() {
        let host = HostTarget::new("x86_64", "linux").unwrap();
        let a = Artifact::new("https://x/y/zig-linux-x86_64-0.13.0.tar.xz");
        assert_eq!(a.filename(), "zig-linux-x86_64-0.13.0.tar.xz");
        assert_eq!(a.format(host), ArchiveFormat::TarXz);

        let bare = Artifact::new("https://x/download?id=7");
        assert_eq!(bare.filename(), "download");
        assert_eq!(bare.format(host), ArchiveFormat::TarXz);
    }

    #[test]
    fn sources_put_canonical_first_then_mirrors() {
        let mut config = EngineConfig::with_home("/tmp/toolpin");
        config.stable_index_url = "https://canonical/index.json".into();
        config.mirrors = vec!["https://m1/".into(), "https://m2".into()];
        let fetcher = IndexFetcher::new(&config).unwrap();

        assert_eq!(
            fetcher.sources(Channel::Stable),
            [
                "https://canonical/index.json",
                "https://m1/index.json",
                "https://m2/index.json"
            ]
        );
    }
}
