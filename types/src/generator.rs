//! Generator identity: which native build-file format the server emits.

use serde::{Deserialize, Serialize};

/// A fully resolved generator choice supplied to the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolset: Option<String>,
}

impl Generator {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: None,
            toolset: None,
        }
    }
}

/// Display name of the synthetic "build everything" pseudo-target.
///
/// IDE-family generators (Visual Studio variants, Xcode) emit a project
/// whose umbrella target is `ALL_BUILD`; Make-family generators use `all`.
/// Fixed lookup by generator name, not configurable.
#[must_use]
pub fn all_target_name(generator_name: &str) -> &'static str {
    if generator_name.starts_with("Visual Studio") || generator_name == "Xcode" {
        "ALL_BUILD"
    } else {
        "all"
    }
}
