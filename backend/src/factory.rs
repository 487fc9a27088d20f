//! Backend factory: precondition checks and client startup for existing
//! and brand-new build directories.
//!
//! All preconditions are checked before any process is spawned, so a
//! rejected initialization never leaks a child.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use mortar_client::{ProtocolClient, StartParams};
use mortar_types::{BackendError, BackendEvent, Generator};

use crate::backend::Backend;
use crate::cache_file::{self, KEY_GENERATOR, KEY_SOURCE_DIR};
use crate::generator::{ToolProbe, resolve_generator};

const CLIENT_EVENT_CAPACITY: usize = 256;

/// Parameters for configuring a directory for the first time.
#[derive(Debug, Clone)]
pub struct NewProjectParams {
    pub cmake_path: PathBuf,
    pub source_dir: PathBuf,
    pub binary_dir: PathBuf,
    /// Explicitly pinned generator, used verbatim when present.
    pub generator: Option<Generator>,
    /// Probed in order when no generator is pinned.
    pub preferred_generators: Vec<Generator>,
    pub environment: Vec<(String, String)>,
}

/// Start a backend for a build directory that was configured before.
///
/// The cache artifact must exist; the originally configured source
/// directory is recovered from it, byte-for-byte, because the server
/// rejects a handshake whose source directory differs from the cache's.
pub async fn initialize_configured(
    cmake_path: &Path,
    binary_dir: &Path,
    environment: Vec<(String, String)>,
    event_tx: mpsc::Sender<BackendEvent>,
) -> Result<Backend, BackendError> {
    let cache = cache_file::cache_path(binary_dir);
    if !cache.is_file() {
        return Err(BackendError::CacheMissing(binary_dir.to_path_buf()));
    }
    let entries = cache_file::read_cache(&cache)?;
    let source_dir = entries
        .get(KEY_SOURCE_DIR)
        .map(PathBuf::from)
        .ok_or_else(|| BackendError::CacheUnreadable(binary_dir.to_path_buf()))?;
    let generator_name = entries.get(KEY_GENERATOR).cloned().unwrap_or_default();

    let mut params = StartParams::new(cmake_path, binary_dir);
    params.source_dir = Some(source_dir.clone());
    params.environment = environment;

    let (client_tx, client_rx) = mpsc::channel(CLIENT_EVENT_CAPACITY);
    let client = ProtocolClient::start(params, client_tx).await?;

    Ok(Backend::new(
        client,
        client_rx,
        event_tx,
        cmake_path.to_path_buf(),
        source_dir,
        binary_dir.to_path_buf(),
        generator_name,
        true,
    ))
}

/// Start a backend for a directory that has never been configured.
///
/// Fails fast if the directory already holds a cache artifact (that calls
/// for a clean configure or a different directory), and resolves a
/// generator before spawning anything.
pub async fn initialize_new(
    params: NewProjectParams,
    probe: &dyn ToolProbe,
    event_tx: mpsc::Sender<BackendEvent>,
) -> Result<Backend, BackendError> {
    let cache = cache_file::cache_path(&params.binary_dir);
    if cache.is_file() {
        return Err(BackendError::CachePresent(params.binary_dir));
    }
    let generator = resolve_generator(params.generator, &params.preferred_generators, probe)?;

    let mut start = StartParams::new(&params.cmake_path, &params.binary_dir);
    start.source_dir = Some(params.source_dir.clone());
    start.generator = Some(generator.clone());
    start.environment = params.environment;

    let (client_tx, client_rx) = mpsc::channel(CLIENT_EVENT_CAPACITY);
    let client = ProtocolClient::start(start, client_tx).await?;

    Ok(Backend::new(
        client,
        client_rx,
        event_tx,
        params.cmake_path,
        params.source_dir,
        params.binary_dir,
        generator.name,
        false,
    ))
}
