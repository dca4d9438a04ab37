use serde::{Deserialize, Serialize};

use crate::{
    models::{
        notification::CorrelationToken,
        result::{FailureReason, HandlerResult},
    },
    utils::truncate_message,
};

/// Upper bound on the characters of a completion body.
pub const MAX_COMPLETION_MESSAGE_CHARS: usize = 1024;

const STATUS_SUCCESS: u8 = 0;
const STATUS_FAILURE: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMessage {
    pub correlation: CorrelationToken,
    pub success: bool,
    pub message: Option<String>,
    pub reason: Option<FailureReason>,
}

/// Action-status payload understood by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCompletion {
    pub message_type: u8,
    pub message: String,
    pub complete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl CompletionMessage {
    pub fn from_result(correlation: &CorrelationToken, result: &HandlerResult) -> Self {
        match result {
            HandlerResult::Success { message, .. } => Self {
                correlation: correlation.clone(),
                success: true,
                message: message
                    .as_deref()
                    .map(|m| truncate_message(m, MAX_COMPLETION_MESSAGE_CHARS)),
                reason: None,
            },
            HandlerResult::Failure { reason, message } => Self {
                correlation: correlation.clone(),
                success: false,
                message: Some(truncate_message(message, MAX_COMPLETION_MESSAGE_CHARS))
                    .filter(|m| !m.is_empty()),
                reason: Some(*reason),
            },
        }
    }

    pub fn to_wire(&self) -> WireCompletion {
        let (message_type, default_message) = if self.success {
            (STATUS_SUCCESS, "Processing complete")
        } else {
            (STATUS_FAILURE, "Processing failed")
        };

        WireCompletion {
            message_type,
            message: self
                .message
                .clone()
                .unwrap_or_else(|| default_message.to_string()),
            complete: true,
            reason: self.reason,
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_wire())
    }
}
