//! Human approval gate.
//!
//! One gate lives per session. The reasoning engine drafts a plan, submits
//! it for review, and no mutating operation is dispatched until a human
//! approves. `approved` and `rejected` are terminal; a new request gets a
//! fresh gate.

use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Declined,
    ConfirmationTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Drafting,
    AwaitingConfirmation,
    Approved,
    Rejected(RejectReason),
    /// Human asked for changes; loops back to drafting once the plan is
    /// revised.
    Amending { feedback: String },
}

impl ConfirmationState {
    pub fn name(&self) -> &'static str {
        match self {
            ConfirmationState::Drafting => "drafting",
            ConfirmationState::AwaitingConfirmation => "awaiting_confirmation",
            ConfirmationState::Approved => "approved",
            ConfirmationState::Rejected(_) => "rejected",
            ConfirmationState::Amending { .. } => "amending",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("confirmation gate is {current}, cannot {action}")]
    InvalidTransition {
        current: &'static str,
        action: &'static str,
    },
}

/// Outcome of waiting for the human decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected(RejectReason),
    AmendRequested { feedback: String },
}

pub struct ConfirmationGate {
    state: Mutex<ConfirmationState>,
    tx: watch::Sender<ConfirmationState>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConfirmationState::Drafting);
        Self {
            state: Mutex::new(ConfirmationState::Drafting),
            tx,
        }
    }

    pub fn state(&self) -> ConfirmationState {
        self.locked().clone()
    }

    /// Mutating dispatch is legal only here.
    pub fn allows_mutations(&self) -> bool {
        matches!(*self.locked(), ConfirmationState::Approved)
    }

    /// `set_plan` is legal only while drafting or amending.
    pub fn allows_planning(&self) -> bool {
        matches!(
            *self.locked(),
            ConfirmationState::Drafting | ConfirmationState::Amending { .. }
        )
    }

    pub fn submit_for_review(&self) -> Result<(), GateError> {
        self.transition("submit for review", |state| match state {
            ConfirmationState::Drafting => Some(ConfirmationState::AwaitingConfirmation),
            _ => None,
        })
    }

    pub fn approve(&self) -> Result<(), GateError> {
        self.transition("approve", |state| match state {
            ConfirmationState::AwaitingConfirmation => Some(ConfirmationState::Approved),
            _ => None,
        })
    }

    pub fn reject(&self) -> Result<(), GateError> {
        self.transition("reject", |state| match state {
            ConfirmationState::AwaitingConfirmation => {
                Some(ConfirmationState::Rejected(RejectReason::Declined))
            }
            _ => None,
        })
    }

    pub fn amend(&self, feedback: impl Into<String>) -> Result<(), GateError> {
        let feedback = feedback.into();
        self.transition("request changes", move |state| match state {
            ConfirmationState::AwaitingConfirmation => Some(ConfirmationState::Amending {
                feedback: feedback.clone(),
            }),
            _ => None,
        })
    }

    /// The reasoning engine revised the plan after an amend request.
    pub fn mark_revised(&self) -> Result<(), GateError> {
        self.transition("resume drafting", |state| match state {
            ConfirmationState::Amending { .. } => Some(ConfirmationState::Drafting),
            _ => None,
        })
    }

    /// Time out a pending review. No-op outside `awaiting_confirmation`.
    pub fn expire(&self) {
        let _ = self.transition("expire", |state| match state {
            ConfirmationState::AwaitingConfirmation => Some(ConfirmationState::Rejected(
                RejectReason::ConfirmationTimeout,
            )),
            _ => None,
        });
    }

    /// Suspend until the human decides or the review window lapses.
    pub async fn wait_decision(&self, timeout: Duration) -> Decision {
        let mut rx = self.tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match rx.borrow_and_update().clone() {
                ConfirmationState::Approved => return Decision::Approved,
                ConfirmationState::Rejected(reason) => return Decision::Rejected(reason),
                ConfirmationState::Amending { feedback } => {
                    return Decision::AmendRequested { feedback };
                }
                ConfirmationState::Drafting | ConfirmationState::AwaitingConfirmation => {}
            }
            let changed = tokio::time::timeout_at(deadline, rx.changed()).await;
            match changed {
                Ok(Ok(())) => {}
                // Sender dropped: treat as a decline.
                Ok(Err(_)) => return Decision::Rejected(RejectReason::Declined),
                Err(_) => {
                    self.expire();
                    return Decision::Rejected(RejectReason::ConfirmationTimeout);
                }
            }
        }
    }

    fn transition<F>(&self, action: &'static str, next: F) -> Result<(), GateError>
    where
        F: FnOnce(&ConfirmationState) -> Option<ConfirmationState>,
    {
        let mut state = self.locked();
        let Some(new_state) = next(&state) else {
            return Err(GateError::InvalidTransition {
                current: state.name(),
                action,
            });
        };
        tracing::info!(from = state.name(), to = new_state.name(), "confirmation gate");
        *state = new_state.clone();
        drop(state);
        let _ = self.tx.send(new_state);
        Ok(())
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ConfirmationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}
