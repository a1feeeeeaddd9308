//! UI boundary.
//!
//! The controller tells the UI what to show through [`WebEidUi`]; the UI
//! answers through the [`UiResponder`] passed along with every request that
//! needs a decision. Answers are queued on the controller's event channel,
//! so a UI may respond from inside the callback or later from any thread.

use std::sync::Arc;

use eidbridge_card::{CardInfo, Pin, PinInfo};
use eidbridge_core::RetriableError;
use tokio::sync::mpsc;
use tracing::trace;

use crate::command_handlers::CertificateReady;
use crate::event::{ControllerEvent, UiEvent};

/// Dialogs and notifications shown to the user.
///
/// Implementations must not block; long-running dialogs keep the responder
/// and answer later.
pub trait WebEidUi: Send + Sync {
    /// Several cards match; ask the user to pick one by index.
    fn request_card_selection(&self, cards: &[Arc<CardInfo>], responder: UiResponder);

    /// Show the certificate and ask for confirmation (and the PIN, if needed).
    fn on_certificate_ready(&self, certificate: &CertificateReady, responder: UiResponder);

    /// PIN entry moved to the reader's PIN-pad. Cancel stays available.
    fn wait_for_pin_pad(&self, card: &CardInfo, pin_info: Option<&PinInfo>, responder: UiResponder);

    /// The PIN was wrong; ask again.
    fn on_verify_pin_failed(&self, retries_left: u8, responder: UiResponder);

    /// Reader or card state changed.
    fn status_update(&self, status: RetriableError);

    /// A retriable error occurred; offer retry (if `retry_allowed`) and cancel.
    fn show_retriable_error(
        &self,
        error: RetriableError,
        message: &str,
        retry_allowed: bool,
        responder: UiResponder,
    );

    /// The run failed; no further interaction.
    fn show_critical_failure(&self, message: &str);

    /// The run is over; close all dialogs.
    fn quit(&self);
}

/// Channel back to the controller for user decisions.
#[derive(Debug, Clone)]
pub struct UiResponder {
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl UiResponder {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { event_tx }
    }

    /// OK: the selected card index, or the entered PIN for a confirmation.
    pub fn ok(&self, selected_index: usize, pin: Option<Pin>) {
        self.send(UiEvent::Ok {
            selected_index,
            pin,
        });
    }

    pub fn cancel(&self) {
        self.send(UiEvent::Cancel);
    }

    pub fn retry(&self) {
        self.send(UiEvent::Retry);
    }

    fn send(&self, event: UiEvent) {
        if self.event_tx.send(ControllerEvent::Ui(event)).is_err() {
            trace!("Controller has exited, dropping UI decision");
        }
    }
}
