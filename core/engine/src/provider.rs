//! The toolchain provider: an owned state machine that keeps a usable
//! toolchain available and tells observers when it changes.
//!
//! ```text
//! Uninitialized --trigger--> Installing --ok--> Ready
//!                                 \----err--> Failed
//! Ready / Failed --trigger--> Installing
//! ```
//!
//! Triggers are debounced: each one restarts a quiet period, and a single
//! pipeline run follows once it elapses. A trigger that arrives while a run
//! is in progress schedules exactly one more run; nothing is cancelled
//! mid-flight. Runs and explicit-path checks are serialized through one
//! async mutex, so state transitions never interleave.
//!
//! Every transition is broadcast as the full new state. Shutdown stops the
//! worker once it is idle; a run already in progress still finishes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, watch};

use crate::config::{ConfigStore, EngineConfig};
use crate::error::{FailureReason, Result, ToolchainError};
use crate::index::{FetchSession, IndexFetcher};
use crate::installer::{InstalledToolchain, Installer};
use crate::platform::HostTarget;
use crate::resolver::{ManifestReader, Resolution, VersionResolver, select_release};
use crate::version::{Channel, Source, ToolchainVersion, VersionRequirement};

const EVENT_CAPACITY: usize = 64;

/// A toolchain ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToolchain {
    /// Version the executable reported.
    pub version: ToolchainVersion,
    /// Absolute path of the executable.
    pub executable: PathBuf,
    /// Where the version requirement came from.
    pub source: Source,
    /// The project's declared minimum, when this toolchain is older than it.
    pub unsatisfied_minimum: Option<ToolchainVersion>,
}

/// Provider lifecycle state. Observers receive clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Installing(VersionRequirement),
    Ready(ResolvedToolchain),
    Failed(FailureReason),
}

impl ProviderState {
    /// `Ready` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }

    #[must_use]
    pub fn as_ready(&self) -> Option<&ResolvedToolchain> {
        match self {
            Self::Ready(toolchain) => Some(toolchain),
            _ => None,
        }
    }
}

/// Everything a pipeline run needs.
#[derive(Clone)]
pub struct Pipeline {
    resolver: VersionResolver,
    fetcher: IndexFetcher,
    installer: Installer,
    store: Arc<dyn ConfigStore>,
    host: HostTarget,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("resolver", &self.resolver)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds the pipeline components from configuration.
    ///
    /// # Errors
    ///
    /// `Config` if the trusted key is malformed or an HTTP client cannot be
    /// built.
    pub fn new(
        config: &EngineConfig,
        host: HostTarget,
        project_root: Option<PathBuf>,
        manifest: Arc<dyn ManifestReader>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        Ok(Self {
            resolver: VersionResolver::new(
                project_root,
                config.pinned_file_name.clone(),
                manifest,
                Arc::clone(&store),
            ),
            fetcher: IndexFetcher::new(config)?,
            installer: Installer::new(config, host)?,
            store,
            host,
        })
    }

    #[must_use]
    pub fn with_installer(mut self, installer: Installer) -> Self {
        self.installer = installer;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Resolves, selects, and installs (or reuses) a toolchain.
    ///
    /// # Errors
    ///
    /// Any pipeline error.
    pub async fn acquire(&self, resolution: &Resolution) -> Result<ResolvedToolchain> {
        let requirement = &resolution.requirement;

        // a pinned exact version that is already installed needs no index
        if let VersionRequirement::Exact(version) = requirement
            && let Some(installed) = self.installer.activate_installed(version).await?
        {
            return Ok(self.finish(installed, resolution));
        }

        let mut session = FetchSession::new(&self.fetcher);
        let channel = requirement.channel();
        let first = {
            let index = session.index(channel).await?;
            select_release(index, requirement, self.host).map(|(e, a)| (e.clone(), a.clone()))
        };
        let (entry, artifact) = match first {
            Ok(found) => found,
            Err(err @ ToolchainError::NoSatisfyingVersion { .. })
                if matches!(requirement, VersionRequirement::AtLeast(_))
                    && channel == Channel::Stable =>
            {
                tracing::debug!("no stable release satisfies {requirement}, trying nightly index: {err}");
                let index = session.index(Channel::Nightly).await?;
                let (e, a) = select_release(index, requirement, self.host)?;
                (e.clone(), a.clone())
            }
            Err(err) => return Err(err),
        };

        let version = entry.version.clone();
        tracing::info!(%version, %requirement, "selected release");

        let installed = match self.installer.activate_installed(&version).await? {
            Some(installed) => installed,
            None => self.installer.install(&entry, &artifact, &version).await?,
        };
        Ok(self.finish(installed, resolution))
    }

    fn finish(&self, installed: InstalledToolchain, resolution: &Resolution) -> ResolvedToolchain {
        let unsatisfied_minimum = resolution.unsatisfied_minimum(&installed.version).cloned();
        warn_below_minimum(&installed.version, resolution, unsatisfied_minimum.as_ref());
        ResolvedToolchain {
            version: installed.version,
            executable: installed.executable,
            source: resolution.source,
            unsatisfied_minimum,
        }
    }

    /// Validates a user-supplied executable without touching the installer.
    ///
    /// # Errors
    ///
    /// `PathInvalid` if the path is not a file or fails the version query.
    pub async fn check_explicit_path(
        &self,
        path: &Path,
        resolution: &Resolution,
    ) -> Result<ResolvedToolchain> {
        let absolute = std::path::absolute(path)
            .map_err(|e| ToolchainError::path_invalid(path, e.to_string()))?;
        if !absolute.is_file() {
            return Err(ToolchainError::path_invalid(
                &absolute,
                "not an existing file",
            ));
        }
        let version = self
            .installer
            .probe()
            .query(&absolute)
            .await
            .map_err(|msg| ToolchainError::path_invalid(&absolute, msg))?;

        let unsatisfied_minimum = resolution.unsatisfied_minimum(&version).cloned();
        warn_below_minimum(&version, resolution, unsatisfied_minimum.as_ref());
        Ok(ResolvedToolchain {
            version,
            executable: absolute,
            source: Source::ExplicitPath,
            unsatisfied_minimum,
        })
    }
}

fn warn_below_minimum(
    version: &ToolchainVersion,
    resolution: &Resolution,
    minimum: Option<&ToolchainVersion>,
) {
    if let (Some(min), Some(declared)) = (minimum, &resolution.minimum) {
        tracing::warn!(
            %version,
            minimum = %min,
            manifest = %declared.location.display(),
            "toolchain is older than the project's minimum version"
        );
    }
}

/// Progress of the worker's pipeline runs, numbered from 1.
#[derive(Debug, Clone)]
struct RunStatus {
    started: u64,
    finished: u64,
    /// Terminal state of run `finished`.
    last: ProviderState,
    running: bool,
    stopped: bool,
}

struct Shared {
    state: RwLock<ProviderState>,
    events: broadcast::Sender<ProviderState>,
    status: watch::Sender<RunStatus>,
    pending: AtomicBool,
    wake: Notify,
    run_lock: tokio::sync::Mutex<()>,
    debounce: Duration,
    pipeline: Pipeline,
}

impl Shared {
    fn state(&self) -> ProviderState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Callers hold `run_lock`.
    fn transition(&self, next: ProviderState) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state = next.clone();
        }
        match &next {
            ProviderState::Ready(t) => {
                tracing::info!(version = %t.version, source = %t.source, "toolchain ready");
            }
            ProviderState::Failed(reason) => tracing::warn!("toolchain unavailable: {reason}"),
            ProviderState::Installing(req) => tracing::debug!(requirement = %req, "installing"),
            ProviderState::Uninitialized => {}
        }
        // no receivers is fine
        let _ = self.events.send(next);
    }

    /// Claims the next run number, unless the provider has stopped.
    fn begin_run(&self) -> Option<u64> {
        let mut run = None;
        self.status.send_if_modified(|status| {
            if status.stopped {
                return false;
            }
            status.started += 1;
            status.running = true;
            run = Some(status.started);
            true
        });
        run
    }

    async fn run_pipeline(&self, run: u64) {
        let _guard = self.run_lock.lock().await;

        let resolution = self.pipeline.resolver.resolve();
        let next = if let Some(path) = self.pipeline.store.executable_path() {
            match self.pipeline.check_explicit_path(&path, &resolution).await {
                Ok(toolchain) => ProviderState::Ready(toolchain),
                Err(e) => ProviderState::Failed(e.into()),
            }
        } else {
            self.transition(ProviderState::Installing(resolution.requirement.clone()));
            match self.pipeline.acquire(&resolution).await {
                Ok(toolchain) => ProviderState::Ready(toolchain),
                Err(e) => ProviderState::Failed(e.into()),
            }
        };

        self.transition(next.clone());
        self.status.send_modify(|status| {
            status.finished = run;
            status.last = next;
            status.running = false;
        });
    }

    async fn worker(self: Arc<Self>) {
        let mut stop = self.status.subscribe();
        loop {
            tokio::select! {
                () = self.wake.notified() => {}
                () = stopped(&mut stop) => return,
            }
            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.debounce) => break,
                    () = self.wake.notified() => {}
                    () = stopped(&mut stop) => return,
                }
            }
            if self.pending.swap(false, Ordering::SeqCst) {
                let Some(run) = self.begin_run() else {
                    return;
                };
                self.run_pipeline(run).await;
            }
        }
    }
}

/// Resolves once the provider has been shut down.
async fn stopped(status: &mut watch::Receiver<RunStatus>) {
    while !status.borrow_and_update().stopped {
        if status.changed().await.is_err() {
            return;
        }
    }
}

/// Owns the toolchain state for one project.
///
/// Must be created inside a Tokio runtime; it spawns a worker task that
/// lives until [`shutdown`](Self::shutdown) or drop.
pub struct ToolchainProvider {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ToolchainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolchainProvider")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ToolchainProvider {
    /// Starts a provider in the `Uninitialized` state.
    #[must_use]
    pub fn start(pipeline: Pipeline, debounce: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(RunStatus {
            started: 0,
            finished: 0,
            last: ProviderState::Uninitialized,
            running: false,
            stopped: false,
        });
        let shared = Arc::new(Shared {
            state: RwLock::new(ProviderState::Uninitialized),
            events,
            status,
            pending: AtomicBool::new(false),
            wake: Notify::new(),
            run_lock: tokio::sync::Mutex::new(()),
            debounce,
            pipeline,
        });
        tokio::spawn(Arc::clone(&shared).worker());
        Self { shared }
    }

    /// Builds the pipeline from `config` for the running host and starts.
    ///
    /// # Errors
    ///
    /// `Config` if the host is unsupported or the configuration is invalid.
    pub fn from_config(
        config: &EngineConfig,
        project_root: Option<PathBuf>,
        manifest: Arc<dyn ManifestReader>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let host = HostTarget::detect()?;
        let pipeline = Pipeline::new(config, host, project_root, manifest, store)?;
        Ok(Self::start(pipeline, config.debounce()))
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.shared.pipeline
    }

    /// Requests a pipeline run after the quiet period. Never blocks.
    pub fn trigger(&self, reason: &str) {
        tracing::debug!(reason, "toolchain refresh requested");
        self.shared.pending.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Triggers a run and waits for the terminal state of a run that started
    /// after this call.
    ///
    /// After [`shutdown`](Self::shutdown), returns the current state once no
    /// run is in progress.
    pub async fn refresh(&self) -> ProviderState {
        let mut status = self.shared.status.subscribe();
        let target = status.borrow_and_update().started + 1;
        self.trigger("refresh");

        loop {
            {
                let current = status.borrow_and_update();
                if current.finished >= target {
                    return current.last.clone();
                }
                if current.stopped && !current.running {
                    break;
                }
            }
            if status.changed().await.is_err() {
                break;
            }
        }
        self.state()
    }

    /// Validates a user-supplied executable and makes it the current state.
    ///
    /// The installer is never involved. Waits for any in-flight run.
    pub async fn resolve_explicit_path(&self, path: &Path) -> ProviderState {
        let _guard = self.shared.run_lock.lock().await;
        let resolution = self.shared.pipeline.resolver.resolve();
        let next = match self
            .shared
            .pipeline
            .check_explicit_path(path, &resolution)
            .await
        {
            Ok(toolchain) => ProviderState::Ready(toolchain),
            Err(e) => ProviderState::Failed(e.into()),
        };
        self.shared.transition(next.clone());
        next
    }

    /// Receives every subsequent state transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderState> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ProviderState {
        self.shared.state()
    }

    /// The ready toolchain, if any.
    #[must_use]
    pub fn current(&self) -> Option<ResolvedToolchain> {
        self.state().as_ready().cloned()
    }

    /// Stops the worker. A run in progress finishes and publishes its
    /// terminal state; pending triggers are dropped.
    pub fn shutdown(&self) {
        let first = self
            .shared
            .status
            .send_if_modified(|status| !std::mem::replace(&mut status.stopped, true));
        if first {
            tracing::debug!("toolchain provider stopping");
        }
    }
}

impl Drop for ToolchainProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::error::FailureKind;
    use crate::resolver::NoManifest;

    fn pipeline(home: &Path, store: Arc<MemoryConfigStore>) -> Pipeline {
        let mut config = EngineConfig::with_home(home);
        // unroutable: any fetch fails fast
        config.stable_index_url = "http://127.0.0.1:9/index.json".into();
        config.nightly_index_url = config.stable_index_url.clone();
        config.request_timeout_secs = 2;
        let host = HostTarget::new("x86_64", "linux").unwrap();
        Pipeline::new(&config, host, None, Arc::new(NoManifest), store).unwrap()
    }

    #[tokio::test]
    async fn starts_uninitialized() {
        let home = tempfile::tempdir().unwrap();
        let provider = ToolchainProvider::start(
            pipeline(home.path(), Arc::new(MemoryConfigStore::new())),
            Duration::from_millis(10),
        );

        assert_eq!(provider.state(), ProviderState::Uninitialized);
        assert_eq!(provider.current(), None);
    }

    #[tokio::test]
    async fn unreachable_index_fails_after_installing() {
        let home = tempfile::tempdir().unwrap();
        let provider = ToolchainProvider::start(
            pipeline(home.path(), Arc::new(MemoryConfigStore::new())),
            Duration::from_millis(10),
        );
        let mut events = provider.subscribe();

        let state = provider.refresh().await;

        let ProviderState::Failed(reason) = state else {
            panic!("expected Failed, got {state:?}");
        };
        assert_eq!(reason.kind, FailureKind::IndexUnavailable);
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderState::Installing(VersionRequirement::LatestStable)
        );
    }

    #[tokio::test]
    async fn explicit_path_to_missing_file_is_path_invalid() {
        let home = tempfile::tempdir().unwrap();
        let provider = ToolchainProvider::start(
            pipeline(home.path(), Arc::new(MemoryConfigStore::new())),
            Duration::from_millis(10),
        );

        let state = provider
            .resolve_explicit_path(&home.path().join("missing-zig"))
            .await;

        let ProviderState::Failed(reason) = state else {
            panic!("expected Failed, got {state:?}");
        };
        assert_eq!(reason.kind, FailureKind::PathInvalid);
        assert_eq!(provider.state(), ProviderState::Failed(reason));
    }

    #[tokio::test]
    async fn configured_explicit_path_skips_installing() {
        let home = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set_executable_path(Some(home.path().join("missing-zig")))
            .unwrap();
        let provider =
            ToolchainProvider::start(pipeline(home.path(), store), Duration::from_millis(10));
        let mut events = provider.subscribe();

        let state = provider.refresh().await;

        assert!(matches!(state, ProviderState::Failed(ref r) if r.kind == FailureKind::PathInvalid));
        // the first broadcast is already terminal
        assert_eq!(events.recv().await.unwrap(), state);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let home = tempfile::tempdir().unwrap();
        let provider = ToolchainProvider::start(
            pipeline(home.path(), Arc::new(MemoryConfigStore::new())),
            Duration::from_millis(10),
        );
        provider.shutdown();
        provider.shutdown();
        assert_eq!(provider.state(), ProviderState::Uninitialized);
    }

    #[tokio::test]
    async fn refresh_after_shutdown_returns_without_running() {
        let home = tempfile::tempdir().unwrap();
        let provider = ToolchainProvider::start(
            pipeline(home.path(), Arc::new(MemoryConfigStore::new())),
            Duration::from_millis(10),
        );
        let mut events = provider.subscribe();
        provider.shutdown();

        let state = tokio::time::timeout(Duration::from_secs(5), provider.refresh())
            .await
            .expect("refresh must not hang after shutdown");

        assert_eq!(state, ProviderState::Uninitialized);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }
}
