//! Build-system backend on top of the protocol client.
//!
//! A [`Backend`] owns a live [`mortar_client::ProtocolClient`] and keeps a
//! cached view of the server's codemodel and cache. The [`factory`] module
//! checks build-directory preconditions and starts backends for both
//! already-configured and brand-new directories.

pub mod cache_file;
pub mod factory;
pub mod flags;
pub mod generator;

mod backend;

pub use backend::{Backend, ProjectTarget};
pub use factory::{NewProjectParams, initialize_configured, initialize_new};
pub use generator::{SpawnProbe, ToolProbe, resolve_generator};
