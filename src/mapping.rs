use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::MappingError;

/// Severity stages in model output order.
pub const RETINOPATHY_STAGES: [&str; 5] = ["No DR", "Mild", "Moderate", "Severe", "Proliferative DR"];

/// Ordered class names, position `i` naming output score `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn retinopathy() -> Self {
        Self {
            labels: RETINOPATHY_STAGES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn new(labels: Vec<String>) -> Result<Self, MappingError> {
        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(MappingError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::retinopathy()
    }
}

/// Reads one label per line. Blank lines are skipped and names are trimmed.
pub fn load_class_mapping(file_path: &Path) -> Result<LabelTable, MappingError> {
    let io_err = |source| MappingError::Io {
        path: file_path.to_path_buf(),
        source,
    };
    let file = File::open(file_path).map_err(io_err)?;
    let reader = BufReader::new(file);

    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        let name = line.trim();
        if !name.is_empty() {
            labels.push(name.to_string());
        }
    }

    if labels.is_empty() {
        return Err(MappingError::Empty(file_path.to_path_buf()));
    }
    LabelTable::new(labels)
}
