//! Upstream environments.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("unknown target `{tag}` (declared: {declared})")]
    Unknown { tag: String, declared: String },
}

/// Environment tag to base URL mapping with one active environment.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: BTreeMap<String, String>,
    active: String,
}

impl TargetRegistry {
    pub fn new(targets: BTreeMap<String, String>, active: &str) -> Result<Self, TargetError> {
        if !targets.contains_key(active) {
            return Err(TargetError::Unknown {
                tag: active.to_string(),
                declared: targets.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        }

        let targets = targets
            .into_iter()
            .map(|(tag, url)| (tag, url.trim_end_matches('/').to_string()))
            .collect();

        Ok(Self {
            targets,
            active: active.to_string(),
        })
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.targets.get(tag).map(String::as_str)
    }

    pub fn active_tag(&self) -> &str {
        &self.active
    }

    /// Base URL of the active environment, without a trailing slash.
    pub fn active_url(&self) -> &str {
        self.get(&self.active).unwrap_or_default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}
