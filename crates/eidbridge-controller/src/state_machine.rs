//! Controller state machine.
//!
//! This module tracks where a command run is: waiting for a card, asking the
//! user to pick one, running a handler step on a worker thread, waiting for a
//! user decision, or shutting down.
//!
//! # States
//!
//! - `Init`: Command received, nothing started
//! - `WaitingForCards`: No usable card yet, subscribed to the card monitor
//! - `SelectingCard`: Several usable cards, waiting for the user's choice
//! - `HandlerSelected`: Card bound to the command handler
//! - `AwaitingChildThreads`: Handler step running on a child thread
//! - `AwaitingUserDecision`: Waiting for PIN-pad entry, confirmation or retry
//! - `Finalizing`: Outcome decided, child threads being joined
//! - `Exited`: Terminal
//!
//! # Valid Transitions
//!
//! - Init → WaitingForCards / SelectingCard / HandlerSelected
//! - WaitingForCards → SelectingCard / HandlerSelected
//! - SelectingCard → HandlerSelected / WaitingForCards
//! - HandlerSelected → AwaitingChildThreads
//! - AwaitingChildThreads → AwaitingUserDecision(Confirm | Retry) / WaitingForCards
//! - AwaitingUserDecision(Confirm) → AwaitingChildThreads / AwaitingUserDecision(PinPad) / WaitingForCards
//! - AwaitingUserDecision(PinPad) → AwaitingUserDecision(Confirm | Retry) / WaitingForCards
//! - AwaitingUserDecision(Retry) → WaitingForCards
//! - any non-terminal state → Finalizing → Exited
//!
//! # Examples
//!
//! ```
//! use eidbridge_controller::{ControllerState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! assert_eq!(machine.current_state(), &ControllerState::Init);
//!
//! machine.transition_to(ControllerState::WaitingForCards).unwrap();
//! assert!(machine.transition_to(ControllerState::Exited).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use eidbridge_core::constants::DEFAULT_HISTORY_LIMIT;
use eidbridge_core::{Error, Result};

/// Decision the controller is waiting for in [`ControllerState::AwaitingUserDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    /// PIN is being entered on the reader's PIN-pad.
    PinPad,

    /// Certificate shown, waiting for OK (with PIN) or cancel.
    Confirm,

    /// Retriable failure shown, waiting for retry or cancel.
    Retry,
}

impl fmt::Display for UserDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinPad => write!(f, "PinPad"),
            Self::Confirm => write!(f, "Confirm"),
            Self::Retry => write!(f, "Retry"),
        }
    }
}

/// All states of a command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Init,
    WaitingForCards,
    SelectingCard,
    HandlerSelected,
    AwaitingChildThreads,
    AwaitingUserDecision(UserDecision),
    Finalizing,
    Exited,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::WaitingForCards => write!(f, "WaitingForCards"),
            Self::SelectingCard => write!(f, "SelectingCard"),
            Self::HandlerSelected => write!(f, "HandlerSelected"),
            Self::AwaitingChildThreads => write!(f, "AwaitingChildThreads"),
            Self::AwaitingUserDecision(decision) => write!(f, "AwaitingUserDecision({})", decision),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Exited => write!(f, "Exited"),
        }
    }
}

impl ControllerState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use eidbridge_controller::{ControllerState, UserDecision};
    ///
    /// assert!(ControllerState::Init.can_transition_to(&ControllerState::WaitingForCards));
    /// assert!(!ControllerState::Init.can_transition_to(&ControllerState::AwaitingChildThreads));
    /// assert!(
    ///     ControllerState::AwaitingUserDecision(UserDecision::Retry)
    ///         .can_transition_to(&ControllerState::Finalizing)
    /// );
    /// ```
    pub fn can_transition_to(&self, target: &ControllerState) -> bool {
        use ControllerState::*;
        use UserDecision::*;

        if *target == Finalizing {
            return !self.is_terminal() && *self != Finalizing;
        }

        matches!(
            (self, target),
            // From Init
            (Init, WaitingForCards | SelectingCard | HandlerSelected)
            // From WaitingForCards
            | (WaitingForCards, SelectingCard | HandlerSelected)
            // From SelectingCard
            | (SelectingCard, HandlerSelected | WaitingForCards)
            // From HandlerSelected
            | (HandlerSelected, AwaitingChildThreads)
            // From AwaitingChildThreads
            | (AwaitingChildThreads, AwaitingUserDecision(Confirm | Retry) | WaitingForCards)
            // From AwaitingUserDecision
            | (AwaitingUserDecision(Confirm), AwaitingChildThreads | AwaitingUserDecision(PinPad) | WaitingForCards)
            | (AwaitingUserDecision(PinPad), AwaitingUserDecision(Confirm | Retry) | WaitingForCards)
            | (AwaitingUserDecision(Retry), WaitingForCards)
            // From Finalizing
            | (Finalizing, Exited)
        )
    }

    /// `Exited` accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Exited)
    }

    /// Whether a handler has been bound to a card and has not finished.
    pub fn is_handler_in_flight(&self) -> bool {
        matches!(
            self,
            ControllerState::HandlerSelected
                | ControllerState::AwaitingChildThreads
                | ControllerState::AwaitingUserDecision(_)
        )
    }
}

/// Represents a single state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ControllerState,
    pub to: ControllerState,

    /// Not serialized; set to the time of deserialization.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: ControllerState, to: ControllerState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }
}

/// Validating state machine with a bounded transition history.
///
/// Not thread-safe; owned by the controller and mutated only from its
/// context.
#[derive(Debug)]
pub struct StateMachine {
    current_state: ControllerState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
    history_limit: usize,
}

impl StateMachine {
    /// Create a new state machine in the `Init` state.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a state machine that keeps at most `history_limit` transitions.
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            current_state: ControllerState::Init,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(history_limit.min(DEFAULT_HISTORY_LIMIT)),
            history_limit,
        }
    }

    pub fn current_state(&self) -> &ControllerState {
        &self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, ordered from oldest to newest.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Whether the machine has ever been in `state`, as far as the history reaches.
    pub fn has_visited(&self, state: ControllerState) -> bool {
        self.history.iter().any(|transition| transition.to == state)
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the transition is not
    /// allowed from the current state. The state is left unchanged.
    pub fn transition_to(&mut self, new_state: ControllerState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);

        self.current_state = new_state;
        self.state_entered_at = Instant::now();
        self.add_to_history(transition.clone());

        Ok(transition)
    }

    fn add_to_history(&mut self, transition: StateTransition) {
        if self.history_limit == 0 {
            return;
        }
        self.history.push_back(transition);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
