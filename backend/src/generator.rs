//! Generator resolution: decide which native build-file generator a
//! first-time configure should request.
//!
//! A pinned generator is used verbatim. Otherwise candidates are probed in
//! priority order: caller preferences first, then platform defaults. Tool
//! probing is isolated behind [`ToolProbe`] so resolution is testable with
//! a fake launcher.

use std::process::Stdio;

use mortar_types::{BackendError, Generator};

/// Answers "is this build tool usable?" via a bounded subprocess spawn.
pub trait ToolProbe: Send + Sync {
    fn available(&self, tool: &str) -> bool;
}

/// Real probe: resolve the tool on PATH, then spawn it once. A spawn error
/// or nonzero exit means unavailable; this is an existence check, not a
/// version check.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnProbe;

impl ToolProbe for SpawnProbe {
    fn available(&self, tool: &str) -> bool {
        let Ok(path) = which::which(tool) else {
            return false;
        };
        std::process::Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Generators that are accepted by OS pattern match instead of a tool
/// probe: their build tool is an IDE, not a PATH executable.
fn matches_platform_family(name: &str) -> Option<bool> {
    if name.starts_with("Visual Studio") {
        return Some(cfg!(windows));
    }
    if name == "Xcode" {
        return Some(cfg!(target_os = "macos"));
    }
    None
}

/// Underlying build tool for probeable generator families.
fn tool_for(name: &str) -> Option<&'static str> {
    match name {
        "Ninja" => Some("ninja"),
        "Unix Makefiles" => Some("make"),
        "MinGW Makefiles" => Some("mingw32-make"),
        "NMake Makefiles" => Some("nmake"),
        _ => None,
    }
}

fn platform_defaults() -> Vec<Generator> {
    let mut defaults = Vec::new();
    #[cfg(windows)]
    {
        defaults.push(Generator::named("Visual Studio 16 2019"));
        defaults.push(Generator::named("Visual Studio 15 2017"));
        defaults.push(Generator::named("MinGW Makefiles"));
    }
    #[cfg(target_os = "macos")]
    {
        defaults.push(Generator::named("Xcode"));
    }
    defaults.push(Generator::named("Ninja"));
    #[cfg(not(windows))]
    {
        defaults.push(Generator::named("Unix Makefiles"));
    }
    defaults
}

fn usable(generator: &Generator, probe: &dyn ToolProbe) -> bool {
    if let Some(platform_ok) = matches_platform_family(&generator.name) {
        return platform_ok;
    }
    match tool_for(&generator.name) {
        Some(tool) => probe.available(tool),
        None => {
            tracing::debug!(generator = %generator.name, "no known probe for generator, skipping");
            false
        }
    }
}

/// Resolve a generator for a first-time configure.
///
/// `pinned` short-circuits everything; `preferred` is tried before the
/// platform defaults. Fails only after exhausting all candidates.
pub fn resolve_generator(
    pinned: Option<Generator>,
    preferred: &[Generator],
    probe: &dyn ToolProbe,
) -> Result<Generator, BackendError> {
    if let Some(generator) = pinned {
        return Ok(generator);
    }
    for candidate in preferred.iter().cloned().chain(platform_defaults()) {
        if usable(&candidate, probe) {
            tracing::debug!(generator = %candidate.name, "selected generator");
            return Ok(candidate);
        }
    }
    Err(BackendError::NoGenerator)
}
