//! Minimal reader for the on-disk cache artifact (`CMakeCache.txt`).
//!
//! Only what the factory preconditions need: presence detection and a flat
//! key → value view. Entries look like `KEY:TYPE=VALUE`; keys containing
//! spaces are quoted. Types and properties are not interpreted here — the
//! server's `cache` reply is the authoritative typed view.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// File name that marks a build directory as configured.
pub const CACHE_FILE_NAME: &str = "CMakeCache.txt";

/// Cache key recording the originally configured source directory.
pub const KEY_SOURCE_DIR: &str = "CMAKE_HOME_DIRECTORY";

/// Cache key recording the generator the directory was configured with.
pub const KEY_GENERATOR: &str = "CMAKE_GENERATOR";

#[must_use]
pub fn cache_path(binary_dir: &Path) -> PathBuf {
    binary_dir.join(CACHE_FILE_NAME)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
        return None;
    }
    let (lhs, value) = line.split_once('=')?;
    // KEY or KEY:TYPE; a quoted key may itself contain a colon.
    let key = if let Some(stripped) = lhs.strip_prefix('"') {
        stripped.split_once('"').map(|(key, _)| key)?
    } else {
        lhs.split(':').next()?
    };
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Read the cache file into a key → value map.
pub fn read_cache(path: &Path) -> io::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.lines().filter_map(parse_line).collect())
}
