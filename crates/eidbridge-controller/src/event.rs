//! Messages delivered to the controller's event loop.

use std::fmt;
use std::sync::Arc;

use eidbridge_card::{CardInfo, CardResult, Pin};

use crate::child_thread::ChildThreadId;
use crate::command_handlers::{CertificateReady, CommandHandler, HandlerFailure};
use crate::result::ResultMap;

/// A decision made by the user in the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// OK pressed: a card index for selections, a PIN for confirmations.
    Ok {
        selected_index: usize,
        pin: Option<Pin>,
    },

    Cancel,

    Retry,
}

/// Terminal outcome of one child thread.
///
/// Handler steps hand the handler back together with their result, so it is
/// owned by exactly one side at any time.
pub enum ChildOutcome {
    CardsDiscovered(CardResult<Vec<Arc<CardInfo>>>),

    HandlerRun {
        handler: Box<dyn CommandHandler>,
        result: Result<CertificateReady, HandlerFailure>,
    },

    HandlerConfirm {
        handler: Box<dyn CommandHandler>,
        result: Result<ResultMap, HandlerFailure>,
    },

    Panicked(String),
}

impl fmt::Debug for ChildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CardsDiscovered(result) => f
                .debug_tuple("CardsDiscovered")
                .field(&result.as_ref().map(Vec::len))
                .finish(),
            Self::HandlerRun { handler, result } => f
                .debug_struct("HandlerRun")
                .field("command", &handler.command_type())
                .field("ok", &result.is_ok())
                .finish(),
            Self::HandlerConfirm { handler, result } => f
                .debug_struct("HandlerConfirm")
                .field("command", &handler.command_type())
                .field("ok", &result.is_ok())
                .finish(),
            Self::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
        }
    }
}

/// Everything the controller reacts to besides the card monitor.
#[derive(Debug)]
pub enum ControllerEvent {
    Ui(UiEvent),

    ChildThread {
        id: ChildThreadId,
        outcome: ChildOutcome,
    },
}
