//! Cache reply payload: the server's view of the persisted configuration
//! variables.

use std::collections::HashMap;

use serde::Deserialize;

/// Declared type of a cache variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheEntryType {
    Bool,
    String,
    Path,
    Filepath,
    Internal,
    Uninitialized,
    Static,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct CacheEntryProperties {
    #[serde(rename = "ADVANCED", default)]
    advanced: String,
    #[serde(rename = "HELPSTRING", default)]
    help_string: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCacheEntry {
    key: String,
    #[serde(rename = "type")]
    entry_type: CacheEntryType,
    #[serde(default)]
    value: String,
    #[serde(default)]
    properties: CacheEntryProperties,
}

/// One build-configuration variable as reported by a `cache` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub entry_type: CacheEntryType,
    pub value: String,
    pub help_string: String,
    pub advanced: bool,
}

/// Content of a `cache` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheContent {
    #[serde(rename = "cache", default)]
    entries: Vec<RawCacheEntry>,
}

impl CacheContent {
    /// Flatten into a key → entry map, mapping the stringly `ADVANCED`
    /// property ("0"/"1") to a bool.
    #[must_use]
    pub fn into_entries(self) -> HashMap<String, CacheEntry> {
        self.entries
            .into_iter()
            .map(|raw| {
                (
                    raw.key.clone(),
                    CacheEntry {
                        key: raw.key,
                        entry_type: raw.entry_type,
                        value: raw.value,
                        help_string: raw.properties.help_string,
                        advanced: raw.properties.advanced == "1",
                    },
                )
            })
            .collect()
    }
}
