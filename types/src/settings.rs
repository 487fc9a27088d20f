//! Handshake parameters and the smaller typed reply payloads.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::generator::Generator;
use crate::message::ProtocolVersion;

/// Parameters of the `handshake` request sent after `hello`.
///
/// The source directory is required only when configuring a directory for
/// the first time; for an already-configured build directory the server
/// recovers it from the cache, but if supplied it must match the originally
/// configured path byte-for-byte.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub protocol_version: ProtocolVersion,
    pub build_directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolset: Option<String>,
}

impl HandshakeParams {
    /// Build handshake parameters, splitting an optional generator choice
    /// into the flat fields the wire format wants.
    #[must_use]
    pub fn new(
        protocol_version: ProtocolVersion,
        build_directory: PathBuf,
        source_directory: Option<PathBuf>,
        generator: Option<&Generator>,
    ) -> Self {
        Self {
            protocol_version,
            build_directory,
            source_directory,
            generator: generator.map(|g| g.name.clone()),
            extra_generator: None,
            platform: generator.and_then(|g| g.platform.clone()),
            toolset: generator.and_then(|g| g.toolset.clone()),
        }
    }
}

/// Content of a `globalSettings` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettingsContent {
    #[serde(default)]
    pub build_directory: PathBuf,
    #[serde(default)]
    pub source_directory: PathBuf,
    #[serde(default)]
    pub generator: String,
    #[serde(default)]
    pub extra_generator: String,
    #[serde(default)]
    pub debug_output: bool,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub trace_expand: bool,
    #[serde(default)]
    pub warn_uninitialized: bool,
    #[serde(default)]
    pub warn_unused: bool,
    #[serde(default)]
    pub warn_unused_cli: bool,
    #[serde(default)]
    pub check_system_vars: bool,
}

/// Content of a `cmakeInputs` reply: the build files the configuration was
/// generated from, grouped by origin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CMakeInputsContent {
    #[serde(default)]
    pub cmake_root_directory: PathBuf,
    #[serde(default)]
    pub source_directory: PathBuf,
    #[serde(default)]
    pub build_files: Vec<BuildFileGroup>,
}

/// One group of watched build files from a `cmakeInputs` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFileGroup {
    #[serde(default, rename = "isCMake")]
    pub is_cmake: bool,
    #[serde(default)]
    pub is_temporary: bool,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
}
