//! Mock/Proxy mode selection.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Branch taken by requests under the API prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Mock,
    Proxy,
}

/// Shared toggle read once per request.
///
/// Clones share the same toggle, so a flip through any handle is seen by the
/// next request without a restart.
#[derive(Debug, Clone, Default)]
pub struct ModeSelector {
    mock: Arc<AtomicBool>,
}

impl ModeSelector {
    pub fn new(mock: bool) -> Self {
        Self {
            mock: Arc::new(AtomicBool::new(mock)),
        }
    }

    /// Interpret a `MOCK`-style setting: only the literal `true` selects Mock.
    pub fn from_toggle(value: Option<&str>) -> Self {
        Self::new(parse_toggle(value))
    }

    pub fn is_mock_mode(&self) -> bool {
        self.mock.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> Mode {
        if self.is_mock_mode() {
            Mode::Mock
        } else {
            Mode::Proxy
        }
    }

    pub fn set_mock(&self, mock: bool) {
        self.mock.store(mock, Ordering::SeqCst);
    }
}

pub fn parse_toggle(value: Option<&str>) -> bool {
    value == Some("true")
}
