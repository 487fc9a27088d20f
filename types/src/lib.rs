//! Core domain types for mortar.
//!
//! This crate contains pure domain types with no IO and no async: the wire
//! message envelope, reply payloads (code model, cache, global settings),
//! generator descriptions, events, and the error taxonomy. Everything here
//! can be used from any layer of the workspace.

mod cache;
mod codemodel;
mod error;
mod event;
mod generator;
mod message;
mod settings;

pub use cache::{CacheContent, CacheEntry, CacheEntryType};
pub use codemodel::{
    CodeModelConfiguration, CodeModelContent, CodeModelProject, CodeModelTarget, CompilationInfo,
    Define, FileGroup, IncludeDir, IncludePath, TargetType,
};
pub use error::{BackendError, ClientError, ServerError, StartupError};
pub use event::{BackendEvent, ClientEvent, ProgressUpdate};
pub use generator::{Generator, all_target_name};
pub use message::{
    DisplayMessageContent, ErrorEnvelope, HelloContent, IncomingMessage, ProgressEnvelope,
    ProtocolVersion, ReplyEnvelope, SIGNAL_DIRTY, SIGNAL_FILE_CHANGE, SignalEnvelope,
};
pub use settings::{BuildFileGroup, CMakeInputsContent, GlobalSettingsContent, HandshakeParams};
