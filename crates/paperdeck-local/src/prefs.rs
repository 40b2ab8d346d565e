//! User preferences: search keywords, result limits, saved papers.
//!
//! One JSON document on disk; absent fields fall back to defaults so old
//! preference files keep loading as the schema grows.

use paperdeck_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_max_results() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub saved_papers: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            max_results: default_max_results(),
            saved_papers: Vec::new(),
        }
    }
}

/// Filesystem-backed preferences store.
#[derive(Debug, Clone)]
pub struct PrefsStore {
    path: PathBuf,
}

impl PrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load preferences; a missing file yields defaults.
    pub fn load(&self) -> Result<Preferences> {
        if !self.path.exists() {
            return Ok(Preferences::default());
        }
        let bytes = fs::read(&self.path).map_err(|e| Error::Storage(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Storage(e.to_string()))
    }

    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(prefs).map_err(|e| Error::Storage(e.to_string()))?;
        fs::write(&self.path, bytes).map_err(|e| Error::Storage(e.to_string()))
    }

    /// Add a paper to the saved list; already-saved ids are a no-op.
    pub fn save_paper(&self, id: &str) -> Result<Preferences> {
        let mut prefs = self.load()?;
        if !prefs.saved_papers.iter().any(|p| p == id) {
            prefs.saved_papers.push(id.to_string());
            self.save(&prefs)?;
        }
        Ok(prefs)
    }

    pub fn remove_paper(&self, id: &str) -> Result<Preferences> {
        let mut prefs = self.load()?;
        prefs.saved_papers.retain(|p| p != id);
        self.save(&prefs)?;
        Ok(prefs)
    }
}
