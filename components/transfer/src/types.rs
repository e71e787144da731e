use serde::{Deserialize, Serialize};

use proto::crypto::SecretHash;
use proto::state_change::StateChange;
use proto::transfer::events::Event;

use crate::initiator::{self, InitiatorState};
use crate::mediator::{self, MediatorState};
use crate::target::{self, TargetState};

/// The part we play in a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Mediator,
    Target,
}

/// Outcome of feeding a state change to a transfer state machine.
#[derive(Debug)]
pub struct TransitionResult<S> {
    pub new_state: S,
    pub events: Vec<Event>,
}

impl<S> TransitionResult<S> {
    pub fn new(new_state: S, events: Vec<Event>) -> Self {
        TransitionResult { new_state, events }
    }

    /// No transition, no effects.
    pub fn unchanged(state: S) -> Self {
        TransitionResult::new(state, Vec::new())
    }

    pub fn map_state<T, F>(self, f: F) -> TransitionResult<T>
    where
        F: FnOnce(S) -> T,
    {
        TransitionResult {
            new_state: f(self.new_state),
            events: self.events,
        }
    }
}

/// State of one transfer, for one of the roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferRole {
    Initiator(InitiatorState),
    Mediator(MediatorState),
    Target(TargetState),
}

impl TransferRole {
    pub fn role(&self) -> Role {
        match self {
            TransferRole::Initiator(_) => Role::Initiator,
            TransferRole::Mediator(_) => Role::Mediator,
            TransferRole::Target(_) => Role::Target,
        }
    }

    pub fn secret_hash(&self) -> &SecretHash {
        match self {
            TransferRole::Initiator(state) => &state.transfer.secret_hash,
            TransferRole::Mediator(state) => &state.from_transfer.secret_hash,
            TransferRole::Target(state) => &state.transfer.secret_hash,
        }
    }

    /// A terminal transfer ignores every further state change.
    pub fn is_terminal(&self) -> bool {
        match self {
            TransferRole::Initiator(state) => state.status.is_terminal(),
            TransferRole::Mediator(state) => state.status.is_terminal(),
            TransferRole::Target(state) => state.status.is_terminal(),
        }
    }

    pub fn state_transition(self, state_change: &StateChange) -> TransitionResult<TransferRole> {
        match self {
            TransferRole::Initiator(state) => {
                initiator::state_transition(state, state_change).map_state(TransferRole::Initiator)
            }
            TransferRole::Mediator(state) => {
                mediator::state_transition(state, state_change).map_state(TransferRole::Mediator)
            }
            TransferRole::Target(state) => {
                target::state_transition(state, state_change).map_state(TransferRole::Target)
            }
        }
    }
}
