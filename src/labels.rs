//! Lookup of inverter label strings (device types, status texts) by index.

use crate::error::{Result, SmaError};
use std::collections::HashMap;
use std::path::Path;

pub trait LabelLookup {
    fn label(&self, index: u32) -> Option<String>;
}

/// Lookup with no labels at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabels;

impl LabelLookup for NoLabels {
    fn label(&self, _index: u32) -> Option<String> {
        None
    }
}

impl LabelLookup for HashMap<u32, String> {
    fn label(&self, index: u32) -> Option<String> {
        self.get(&index).cloned()
    }
}

/// Labels from a JSON object mapping decimal indices to strings:
/// `{"8001": "SB 3000", "307": "Ok"}`.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: HashMap<u32, String>,
}

impl LabelMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let labels: HashMap<u32, String> =
            serde_json::from_str(text).map_err(|e| SmaError::Labels(e.to_string()))?;
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<HashMap<u32, String>> for LabelMap {
    fn from(labels: HashMap<u32, String>) -> Self {
        Self { labels }
    }
}

impl LabelLookup for LabelMap {
    fn label(&self, index: u32) -> Option<String> {
        self.labels.label(index)
    }
}
