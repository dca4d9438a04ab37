use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "unhandled action")]
    UnhandledAction,
    #[serde(rename = "handler fault")]
    HandlerFault,
    #[serde(rename = "malformed notification")]
    MalformedNotification,
    #[serde(rename = "transport error")]
    Transport,
    #[serde(rename = "authentication error")]
    Authentication,
    #[serde(rename = "remote validation error")]
    RemoteValidation,
    #[serde(rename = "handler timeout")]
    HandlerTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnhandledAction => "unhandled action",
            FailureReason::HandlerFault => "handler fault",
            FailureReason::MalformedNotification => "malformed notification",
            FailureReason::Transport => "transport error",
            FailureReason::Authentication => "authentication error",
            FailureReason::RemoteValidation => "remote validation error",
            FailureReason::HandlerTimeout => "handler timeout",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    Success {
        updates: BTreeMap<String, Value>,
        message: Option<String>,
    },
    Failure {
        reason: FailureReason,
        message: String,
    },
}

impl HandlerResult {
    pub fn success(message: impl Into<String>) -> Self {
        HandlerResult::Success {
            updates: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        HandlerResult::Failure {
            reason,
            message: message.into(),
        }
    }

    /// Adds a field update. Has no effect on a failure.
    pub fn with_update(mut self, field: impl Into<String>, value: Value) -> Self {
        if let HandlerResult::Success { updates, .. } = &mut self {
            updates.insert(field.into(), value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerResult::Success { .. })
    }

    pub fn updates(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            HandlerResult::Success { updates, .. } => Some(updates),
            HandlerResult::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            HandlerResult::Success { .. } => None,
            HandlerResult::Failure { reason, .. } => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_serializes_to_its_wire_label() {
        let encoded = serde_json::to_string(&FailureReason::UnhandledAction).unwrap();
        assert_eq!(encoded, "\"unhandled action\"");

        let decoded: FailureReason = serde_json::from_str("\"handler fault\"").unwrap();
        assert_eq!(decoded, FailureReason::HandlerFault);
    }

    #[test]
    fn updates_are_ignored_on_failure() {
        let result = HandlerResult::failure(FailureReason::Transport, "down")
            .with_update("field", json!("value"));

        assert_eq!(result.updates(), None);
        assert_eq!(result.reason(), Some(FailureReason::Transport));
    }
}
