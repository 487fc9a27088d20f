//! Parsing helpers for the compilation-info projection: flag tokenization,
//! define parsing, and path comparison.

use std::path::{Component, Path, PathBuf};

use mortar_types::Define;

/// Split a compile-flags string into tokens, respecting single and double
/// quotes and backslash escapes outside single quotes.
#[must_use]
pub fn tokenize_flags(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = raw.chars();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(_) => {
                if c == '"' {
                    quote = None;
                } else if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else {
                    current.push(c);
                }
            }
            None => {
                if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else if c == '"' || c == '\'' {
                    quote = Some(c);
                    in_token = true;
                } else if c == '\\' {
                    in_token = true;
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else {
                    in_token = true;
                    current.push(c);
                }
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Parse a `NAME=VALUE` or bare `NAME` preprocessor define.
#[must_use]
pub fn parse_define(raw: &str) -> Define {
    match raw.split_once('=') {
        Some((name, value)) => Define {
            name: name.to_string(),
            value: Some(value.to_string()),
        },
        None => Define {
            name: raw.to_string(),
            value: None,
        },
    }
}

/// Normalize away `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Whether two paths name the same file: normalized, and case- and
/// separator-insensitive where the platform is.
#[must_use]
pub fn paths_equivalent(a: &Path, b: &Path) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    #[cfg(windows)]
    {
        let fold = |p: &Path| p.to_string_lossy().replace('\\', "/").to_lowercase();
        fold(&a) == fold(&b)
    }
    #[cfg(not(windows))]
    {
        a == b
    }
}
