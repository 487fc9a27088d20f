//! mortar — a client library for CMake's server mode.
//!
//! The server is spawned as a child process and spoken to over a named
//! pipe using sentinel-delimited JSON frames. The workspace layers:
//!
//! - [`mortar_types`]: wire messages, reply payloads, events, errors.
//! - [`mortar_client`]: framing codec, transport and process supervision,
//!   cookie correlation, and the typed request surface.
//! - [`mortar_backend`]: configure/compute sequencing, derived project
//!   state (code model, cache), generator resolution, builds.
//!
//! This crate re-exports the pieces most callers need and adds
//! [`Project`], a handle that owns at most one backend, creates it on
//! demand, and recreates it when settings change.
//!
//! ```no_run
//! use mortar::{Project, ProjectSettings};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), mortar::BackendError> {
//! let (events, _event_rx) = mpsc::channel(64);
//! let settings = ProjectSettings::new("/usr/bin/cmake", "/src/app", "/src/app/build");
//! let mut project = Project::new(settings, events);
//! if project.configure(&[], &CancellationToken::new()).await? {
//!     for target in project.targets()? {
//!         println!("{}", target.name);
//!     }
//! }
//! project.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod project;

pub use project::{Project, ProjectSettings};

pub use mortar_backend::{Backend, NewProjectParams, ProjectTarget, SpawnProbe, ToolProbe};
pub use mortar_client::{ProtocolClient, RequestObservers, StartParams};
pub use mortar_types::{
    BackendError, BackendEvent, CacheEntry, ClientError, CompilationInfo, Generator,
    ProgressUpdate, TargetType,
};
