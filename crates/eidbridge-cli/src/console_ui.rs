//! Auto-responding console UI.
//!
//! Prints every dialog to the log and answers it from the command line
//! options, so a full command run needs no interaction.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use eidbridge_card::{CardInfo, Pin, PinInfo};
use eidbridge_controller::{CertificateReady, UiResponder, WebEidUi};
use eidbridge_core::RetriableError;

/// Scripted answers for the console UI.
#[derive(Debug, Clone, Default)]
pub struct ConsoleScript {
    /// Card index picked when several cards match.
    pub select: usize,

    /// PINs entered in order: first at confirmation, then after each wrong PIN.
    pub pins: Vec<String>,

    /// Cancel instead of confirming the certificate.
    pub cancel: bool,

    /// Retry after retriable errors.
    pub retry: bool,
}

pub struct ConsoleUi {
    select: usize,
    pins: Mutex<VecDeque<Pin>>,
    cancel: bool,
    retry: bool,
}

impl ConsoleUi {
    pub fn new(script: ConsoleScript) -> Self {
        Self {
            select: script.select,
            pins: Mutex::new(script.pins.into_iter().map(Pin::new).collect()),
            cancel: script.cancel,
            retry: script.retry,
        }
    }

    fn next_pin(&self) -> Option<Pin> {
        self.pins.lock().pop_front()
    }
}

impl WebEidUi for ConsoleUi {
    fn request_card_selection(&self, cards: &[Arc<CardInfo>], responder: UiResponder) {
        for (index, card) in cards.iter().enumerate() {
            info!("[{}] {}", index, card);
        }
        info!("Selecting card {}", self.select);
        responder.ok(self.select, None);
    }

    fn on_certificate_ready(&self, certificate: &CertificateReady, responder: UiResponder) {
        let info = &certificate.certificate_info;
        info!(
            "{} requests the {} certificate of {} (issued by {}, valid {} to {}, {})",
            certificate.origin.origin().ascii_serialization(),
            info.certificate_type,
            info.subject,
            info.issuer,
            info.valid_from.date_naive(),
            info.valid_until.date_naive(),
            certificate.status
        );

        if self.cancel {
            info!("Cancelling");
            responder.cancel();
        } else {
            responder.ok(0, self.next_pin());
        }
    }

    fn wait_for_pin_pad(&self, card: &CardInfo, pin_info: Option<&PinInfo>, _: UiResponder) {
        match pin_info {
            Some(pin_info) => info!(
                "Enter the PIN on the PIN-pad of {} ({} retries left)",
                card.reader().name,
                pin_info.retries_left
            ),
            None => info!("Enter the PIN on the PIN-pad of {}", card.reader().name),
        }
    }

    fn on_verify_pin_failed(&self, retries_left: u8, responder: UiResponder) {
        warn!("Wrong PIN, {} retries left", retries_left);
        match self.next_pin() {
            Some(pin) => responder.ok(0, Some(pin)),
            None => {
                info!("No more PINs to try, cancelling");
                responder.cancel();
            }
        }
    }

    fn status_update(&self, status: RetriableError) {
        info!("{}", status);
    }

    fn show_retriable_error(
        &self,
        error: RetriableError,
        message: &str,
        retry_allowed: bool,
        responder: UiResponder,
    ) {
        warn!("{} ({})", error, message);
        if self.retry && retry_allowed {
            info!("Retrying");
            responder.retry();
        } else {
            responder.cancel();
        }
    }

    fn show_critical_failure(&self, message: &str) {
        error!("{}", message);
    }

    fn quit(&self) {
        debug!("Console UI closed");
    }
}
