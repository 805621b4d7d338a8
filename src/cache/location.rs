use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where playable audio for a request can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AudioLocation {
    /// File in the local audio store.
    Local(PathBuf),
    /// Public URL served by the remote tier.
    Remote(String),
}

impl AudioLocation {
    pub fn is_local(&self) -> bool {
        matches!(self, AudioLocation::Local(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            AudioLocation::Local(p) => Some(p),
            AudioLocation::Remote(_) => None,
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            AudioLocation::Remote(u) => Some(u),
            AudioLocation::Local(_) => None,
        }
    }
}

impl std::fmt::Display for AudioLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioLocation::Local(p) => write!(f, "{}", p.display()),
            AudioLocation::Remote(u) => f.write_str(u),
        }
    }
}
