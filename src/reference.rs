use std::{collections::HashMap, fs, path::Path};

use tracing::{info, warn};

use crate::config::ConfigError;

/// Key/value rows read once from a delimited file. Read-only after load, so it
/// is shared between listeners without locking.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, String>,
}

impl ReferenceTable {
    pub fn load(path: &Path, delimiter: char) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingReferenceFile(path.to_path_buf()));
        }

        let text = fs::read_to_string(path).map_err(|e| ConfigError::UnreadableReferenceFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let table = Self::parse(&text, delimiter);
        info!(path = %path.display(), entries = table.len(), "Reference table loaded");

        Ok(table)
    }

    /// Blank lines, `#` comments and rows with a blank key are skipped; when a
    /// key repeats, the first row wins.
    pub fn parse(text: &str, delimiter: char) -> Self {
        let mut entries = HashMap::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let columns = split_row(line, delimiter);
            match (columns.first(), columns.get(1)) {
                (Some(key), Some(_)) if key.is_empty() => {
                    warn!(line = index + 1, "Skipping reference row with a blank key")
                }
                (Some(key), Some(value)) => {
                    entries
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                _ => warn!(line = index + 1, "Skipping reference row without a value column"),
            }
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits one row, honouring double-quoted fields and `""` escapes.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => {
                columns.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    columns.push(current.trim().to_string());

    columns
}
