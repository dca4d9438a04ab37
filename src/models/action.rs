use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionDefinitionList {
    pub entities: Vec<ActionDefinition>,
}

/// Action ids known to the platform, mapped to normalized action names.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    names: HashMap<i64, String>,
}

impl ActionCatalog {
    pub fn from_definitions(definitions: impl IntoIterator<Item = ActionDefinition>) -> Self {
        let names = definitions
            .into_iter()
            .map(|definition| (definition.id, normalize_action_name(&definition.name)))
            .collect();

        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Unknown ids resolve to `action_<id>`, which never matches a registration.
    pub fn resolve(&self, action_id: i64) -> String {
        match self.names.get(&action_id) {
            Some(name) => name.clone(),
            None => {
                warn!(
                    action_id,
                    "Action is not defined, was it configured after the relay started?"
                );
                format!("action_{}", action_id)
            }
        }
    }
}

/// Lowercases and collapses each run of non-word characters to `_`, so
/// "File Lookup" and "file-lookup" name the same action.
pub fn normalize_action_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '_' {
            normalized.push(c);
            in_separator = false;
        } else if !in_separator {
            normalized.push('_');
            in_separator = true;
        }
    }

    normalized
}
