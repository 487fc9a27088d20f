//! Error taxonomy for the protocol client and the backend.
//!
//! Startup faults are fatal to a client instance and carry the child's exit
//! code. Server-reported errors are routed to the one request they answer.
//! Backend preconditions are rejected before any process is spawned.

use std::path::PathBuf;

use thiserror::Error;

/// The server process failed to start or died before the handshake
/// completed. Never retried automatically.
#[derive(Debug, Clone, Error)]
#[error("cmake server startup failed: {message}{}", exit_display(*.exit_code))]
pub struct StartupError {
    pub message: String,
    /// Exit code of the child, if it exited (as opposed to never spawning).
    pub exit_code: Option<i32>,
}

fn exit_display(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => String::new(),
    }
}

/// An `error` message answering a specific request. Does not tear down the
/// client; the caller decides whether it is a soft failure.
#[derive(Debug, Clone, Error)]
#[error("cmake server error in reply to '{in_reply_to}': {error_message}")]
pub struct ServerError {
    pub error_message: String,
    pub cookie: String,
    pub in_reply_to: String,
}

/// Failures surfaced by a protocol client request or its lifecycle.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// Framing matched but the payload was not usable. Fatal: the stream
    /// cannot be resynchronized once a matched frame fails to parse.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The transport closed (server exit or pipe end) while a request was
    /// outstanding.
    #[error("connection to cmake server closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by the backend and its factory.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No backend exists for the project yet. Callers special-case this to
    /// offer a configure flow; it is not a generic fault.
    #[error("project is not configured")]
    Unconfigured,

    /// `initialize_configured` on a directory with no cache artifact.
    #[error("no CMake cache found in {}", .0.display())]
    CacheMissing(PathBuf),

    /// `initialize_new` on a directory that already has a cache artifact.
    #[error(
        "{} already contains a CMake cache; clean-configure or pick another build directory",
        .0.display()
    )]
    CachePresent(PathBuf),

    /// The cache artifact exists but lacks the key needed to recover the
    /// originally configured source directory.
    #[error("cache in {} does not record a source directory", .0.display())]
    CacheUnreadable(PathBuf),

    /// Every generator candidate was probed and none is usable.
    #[error("no usable generator found")]
    NoGenerator,

    /// The operation was cancelled and the underlying process terminated.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
