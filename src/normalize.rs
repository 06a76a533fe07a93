//! Mock handler key normalization.
//!
//! A request path is reduced to the key its handler is registered under:
//! route-parameter segments and all-digit segments both collapse to `0`,
//! so `/api/user/42`, `/api/user/7` and `/api/{type}` style routes share
//! handlers across resource instances.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// The segment every collapsed segment is replaced with.
const PLACEHOLDER: &str = "0";

/// A request path reduced to its handler lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments of the key, without the leading empty segment.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NormalizedKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Normalize `path` into a handler key.
///
/// Each non-empty route parameter value replaces the first path segment equal
/// to it; afterwards every segment consisting solely of ASCII digits becomes
/// `0`. Parameters are applied in name order so the result never depends on
/// map iteration order.
pub fn normalize(path: &str, params: &HashMap<String, String>) -> NormalizedKey {
    let mut segments: Vec<&str> = path.split('/').collect();

    let mut names: Vec<&String> = params.keys().collect();
    names.sort();

    for name in names {
        let value = params[name].as_str();
        if value.is_empty() {
            continue;
        }
        if let Some(segment) = segments.iter_mut().skip(1).find(|s| **s == value) {
            *segment = PLACEHOLDER;
        }
    }

    for segment in segments.iter_mut() {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            *segment = PLACEHOLDER;
        }
    }

    NormalizedKey(segments.join("/"))
}
