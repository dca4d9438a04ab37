use std::fmt::{Display, Formatter, Result};

use thiserror::Error;

/// Per-notification processing state.
///
/// `Received -> Dispatched -> {Succeeded | Failed} -> Acknowledged`. A
/// notification can only be acknowledged after settling exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Received,
    Dispatched,
    Succeeded,
    Failed,
    Acknowledged,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid notification state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: NotificationState,
    pub to: NotificationState,
}

impl NotificationState {
    pub fn can_transition_to(&self, next: NotificationState) -> bool {
        use NotificationState::*;

        matches!(
            (self, next),
            (Received, Dispatched)
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Succeeded, Acknowledged)
                | (Failed, Acknowledged)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == NotificationState::Acknowledged
    }
}

impl Display for NotificationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationState::Received => write!(f, "received"),
            NotificationState::Dispatched => write!(f, "dispatched"),
            NotificationState::Succeeded => write!(f, "succeeded"),
            NotificationState::Failed => write!(f, "failed"),
            NotificationState::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

/// Tracks one notification through its states, rejecting illegal moves.
#[derive(Debug)]
pub struct Lifecycle {
    state: NotificationState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: NotificationState::Received,
        }
    }

    pub fn state(&self) -> NotificationState {
        self.state
    }

    pub fn advance(&mut self, next: NotificationState) -> std::result::Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
