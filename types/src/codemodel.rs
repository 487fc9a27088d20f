//! Code model reply payload and the compilation-info projection derived
//! from it.
//!
//! The shape mirrors the server's `codemodel` reply: configurations contain
//! projects, projects contain targets, targets contain file groups with the
//! compile settings shared by their sources.

use std::path::PathBuf;

use serde::Deserialize;

/// Target kind as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    StaticLibrary,
    SharedLibrary,
    ModuleLibrary,
    ObjectLibrary,
    Executable,
    Utility,
    InterfaceLibrary,
}

/// One include search path with its system flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludePath {
    pub path: PathBuf,
    #[serde(default)]
    pub is_system: bool,
}

/// A group of sources within a target that share compile settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub compile_flags: String,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub include_path: Vec<IncludePath>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeModelTarget {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    #[serde(default)]
    pub source_directory: Option<PathBuf>,
    #[serde(default)]
    pub build_directory: Option<PathBuf>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub file_groups: Vec<FileGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeModelProject {
    pub name: String,
    #[serde(default)]
    pub source_directory: Option<PathBuf>,
    #[serde(default)]
    pub build_directory: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<CodeModelTarget>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeModelConfiguration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub projects: Vec<CodeModelProject>,
}

/// Content of a `codemodel` reply. Wholesale-replaced after every
/// successful configure+compute cycle, never patched in place.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeModelContent {
    #[serde(default)]
    pub configurations: Vec<CodeModelConfiguration>,
}

/// A preprocessor define parsed from a file group (`NAME=VALUE` or bare
/// `NAME`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    pub name: String,
    pub value: Option<String>,
}

/// One include directory resolved for a specific source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDir {
    pub path: PathBuf,
    pub is_system: bool,
}

/// Compile settings for a single source file, projected out of the cached
/// code model. Read-only: producing one performs no IO.
#[derive(Debug, Clone)]
pub struct CompilationInfo {
    pub file: PathBuf,
    pub language: String,
    pub compile_flags: Vec<String>,
    pub defines: Vec<Define>,
    pub include_dirs: Vec<IncludeDir>,
}
