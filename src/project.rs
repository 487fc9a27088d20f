//! The project handle: one current backend, created on demand and
//! recreated when configuration-relevant settings change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mortar_backend::{
    Backend, NewProjectParams, ProjectTarget, SpawnProbe, ToolProbe, cache_file,
    initialize_configured, initialize_new,
};
use mortar_types::{BackendError, BackendEvent, CacheEntry, CompilationInfo, Generator};

/// Everything a project needs to start a backend. Changing any of the
/// restart-relevant fields on a live project tears the backend down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub cmake_path: PathBuf,
    pub source_dir: PathBuf,
    pub binary_dir: PathBuf,
    /// Pinned generator; used verbatim, never probed.
    pub generator: Option<Generator>,
    /// Probed in order when no generator is pinned. Only consulted for
    /// never-configured build directories.
    pub preferred_generators: Vec<Generator>,
    pub environment: Vec<(String, String)>,
}

impl ProjectSettings {
    #[must_use]
    pub fn new(
        cmake_path: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
        binary_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cmake_path: cmake_path.into(),
            source_dir: source_dir.into(),
            binary_dir: binary_dir.into(),
            generator: None,
            preferred_generators: Vec::new(),
            environment: Vec::new(),
        }
    }

    /// Whether switching to `other` invalidates a running backend.
    /// Preferred generators only matter before the first configure, so a
    /// change there alone does not force a restart.
    #[must_use]
    pub fn requires_restart(&self, other: &Self) -> bool {
        self.cmake_path != other.cmake_path
            || self.source_dir != other.source_dir
            || self.binary_dir != other.binary_dir
            || self.generator != other.generator
            || self.environment != other.environment
    }
}

enum BackendSlot {
    /// No backend; queries fail with [`BackendError::Unconfigured`].
    Absent,
    /// A backend is being created. Observable only while `configure` is
    /// in flight on a shared handle.
    Starting,
    Live(Backend),
}

/// External-facing project handle. Owns at most one backend at a time.
pub struct Project {
    settings: ProjectSettings,
    slot: BackendSlot,
    event_tx: mpsc::Sender<BackendEvent>,
    probe: Arc<dyn ToolProbe>,
}

impl Project {
    #[must_use]
    pub fn new(settings: ProjectSettings, event_tx: mpsc::Sender<BackendEvent>) -> Self {
        Self::with_probe(settings, event_tx, Arc::new(SpawnProbe))
    }

    #[must_use]
    pub fn with_probe(
        settings: ProjectSettings,
        event_tx: mpsc::Sender<BackendEvent>,
        probe: Arc<dyn ToolProbe>,
    ) -> Self {
        Self {
            settings,
            slot: BackendSlot::Absent,
            event_tx,
            probe,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    /// Replace the settings. If the change affects a running backend, it
    /// is shut down; the next `configure` call starts a fresh one.
    pub async fn update_settings(&mut self, settings: ProjectSettings) {
        let restart = self.settings.requires_restart(&settings);
        self.settings = settings;
        if restart {
            if let BackendSlot::Live(backend) =
                std::mem::replace(&mut self.slot, BackendSlot::Absent)
            {
                tracing::debug!("settings changed, restarting backend");
                backend.shutdown().await;
            }
        }
    }

    /// Configure (and compute) the project, starting a backend first if
    /// none is running. Returns `Ok(false)` when the server reported a
    /// configuration failure.
    pub async fn configure(
        &mut self,
        extra_args: &[String],
        cancel: &CancellationToken,
    ) -> Result<bool, BackendError> {
        self.ensure_backend().await?;
        let BackendSlot::Live(backend) = &mut self.slot else {
            return Err(BackendError::Unconfigured);
        };
        match backend.configure(extra_args, cancel).await {
            Ok(ok) => Ok(ok),
            Err(error) => {
                // A cancelled or faulted configure leaves the backend in an
                // unknown server state; drop it and start over next time.
                if let BackendSlot::Live(backend) =
                    std::mem::replace(&mut self.slot, BackendSlot::Absent)
                {
                    backend.shutdown().await;
                }
                Err(error)
            }
        }
    }

    async fn ensure_backend(&mut self) -> Result<(), BackendError> {
        if matches!(self.slot, BackendSlot::Live(_)) {
            return Ok(());
        }
        self.slot = BackendSlot::Starting;
        let cache = cache_file::cache_path(&self.settings.binary_dir);
        let started = if cache.is_file() {
            initialize_configured(
                &self.settings.cmake_path,
                &self.settings.binary_dir,
                self.settings.environment.clone(),
                self.event_tx.clone(),
            )
            .await
        } else {
            initialize_new(
                NewProjectParams {
                    cmake_path: self.settings.cmake_path.clone(),
                    source_dir: self.settings.source_dir.clone(),
                    binary_dir: self.settings.binary_dir.clone(),
                    generator: self.settings.generator.clone(),
                    preferred_generators: self.settings.preferred_generators.clone(),
                    environment: self.settings.environment.clone(),
                },
                self.probe.as_ref(),
                self.event_tx.clone(),
            )
            .await
        };
        match started {
            Ok(backend) => {
                self.slot = BackendSlot::Live(backend);
                Ok(())
            }
            Err(error) => {
                self.slot = BackendSlot::Absent;
                Err(error)
            }
        }
    }

    fn live(&self) -> Result<&Backend, BackendError> {
        match &self.slot {
            BackendSlot::Live(backend) => Ok(backend),
            BackendSlot::Absent | BackendSlot::Starting => Err(BackendError::Unconfigured),
        }
    }

    pub fn targets(&self) -> Result<Vec<ProjectTarget>, BackendError> {
        Ok(self.live()?.targets())
    }

    pub fn compilation_info_for_file(
        &self,
        file: &Path,
    ) -> Result<Option<CompilationInfo>, BackendError> {
        Ok(self.live()?.compilation_info_for_file(file))
    }

    pub fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>, BackendError> {
        Ok(self.live()?.cache_entries().get(key).cloned())
    }

    pub fn is_dirty(&self) -> Result<bool, BackendError> {
        Ok(self.live()?.is_dirty())
    }

    /// Drain backend-side client events (dirty signals, server exit).
    pub fn poll_events(&mut self) -> usize {
        match &mut self.slot {
            BackendSlot::Live(backend) => backend.poll_events(64),
            BackendSlot::Absent | BackendSlot::Starting => 0,
        }
    }

    /// Build one target through the running backend.
    pub async fn build(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, BackendError> {
        self.live()?.build(target, cancel).await
    }

    /// Tear down the backend, if any. The project can be configured again
    /// afterwards.
    pub async fn shutdown(&mut self) {
        if let BackendSlot::Live(backend) = std::mem::replace(&mut self.slot, BackendSlot::Absent) {
            backend.shutdown().await;
        }
    }
}
