//! Common test utilities for controller integration tests.
//!
//! [`ScriptedUi`] answers every dialog the way a test scripts it and records
//! each call as a [`UiCall`], so scenarios can assert on the exact dialog
//! sequence. Hooks let a test act on the card readers at the moment a status
//! or error is shown, which keeps the scenarios free of sleeps.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use eidbridge_card::mock::{MockCard, MockReaderHandle, MockReaders};
use eidbridge_card::{CardInfo, Pin, PinInfo, ReaderInfo};
use eidbridge_controller::{
    CardDiscovery, CertificateReady, CertificateStatus, Controller, ControllerConfig, Outcome,
    UiResponder, WebEidUi,
};
use eidbridge_core::{Command, RetriableError};

/// Valid challenge nonce (44 characters).
pub const NONCE: &str = "12345678123456781234567812345678912356789123";
pub const ORIGIN: &str = "https://ria.ee";
pub const AUTH_PIN: &str = "1234";
pub const SIGNING_PIN: &str = "12345";

/// Upper bound for one controller run in tests.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCall {
    CardSelection(Vec<String>),
    CertificateReady {
        subject: String,
        status: CertificateStatus,
    },
    WaitForPinPad(String),
    VerifyPinFailed(u8),
    Status(RetriableError),
    RetriableError {
        error: RetriableError,
        retry_allowed: bool,
    },
    CriticalFailure(String),
    Quit,
}

type Hook = Box<dyn Fn(RetriableError) + Send + Sync>;
type SelectionHook = Box<dyn Fn(&[Arc<CardInfo>]) + Send + Sync>;

/// UI that answers dialogs from a script.
///
/// - card selection: picks the scripted index, or leaves the dialog open;
/// - certificate confirmation: OK with the next scripted PIN, or cancel;
/// - wrong PIN: OK with the next scripted PIN, cancel when none is left;
/// - retriable error: retry when scripted and allowed, otherwise cancel.
#[derive(Default)]
pub struct ScriptedUi {
    calls: Mutex<Vec<UiCall>>,
    select: Option<usize>,
    pins: Mutex<VecDeque<Pin>>,
    cancel_on_certificate: bool,
    retry: bool,
    on_status: Option<Hook>,
    on_retriable: Option<Hook>,
    on_selection: Option<SelectionHook>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selecting(mut self, index: usize) -> Self {
        self.select = Some(index);
        self
    }

    pub fn with_pins<'a>(self, pins: impl IntoIterator<Item = &'a str>) -> Self {
        self.pins.lock().extend(pins.into_iter().map(Pin::new));
        self
    }

    pub fn cancelling_on_certificate(mut self) -> Self {
        self.cancel_on_certificate = true;
        self
    }

    pub fn retrying(mut self) -> Self {
        self.retry = true;
        self
    }

    pub fn on_status(mut self, hook: impl Fn(RetriableError) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Box::new(hook));
        self
    }

    pub fn on_retriable(mut self, hook: impl Fn(RetriableError) + Send + Sync + 'static) -> Self {
        self.on_retriable = Some(Box::new(hook));
        self
    }

    /// Act on the readers while the selection dialog is open.
    pub fn on_selection(
        mut self,
        hook: impl Fn(&[Arc<CardInfo>]) + Send + Sync + 'static,
    ) -> Self {
        self.on_selection = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&UiCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: UiCall) {
        self.calls.lock().push(call);
    }
}

impl WebEidUi for ScriptedUi {
    fn request_card_selection(&self, cards: &[Arc<CardInfo>], responder: UiResponder) {
        self.record(UiCall::CardSelection(
            cards.iter().map(|card| card.reader().name.clone()).collect(),
        ));
        if let Some(hook) = &self.on_selection {
            hook(cards);
        }
        if let Some(index) = self.select {
            responder.ok(index, None);
        }
    }

    fn on_certificate_ready(&self, certificate: &CertificateReady, responder: UiResponder) {
        self.record(UiCall::CertificateReady {
            subject: certificate.certificate_info.subject.clone(),
            status: certificate.status,
        });
        if self.cancel_on_certificate {
            responder.cancel();
        } else {
            responder.ok(0, self.pins.lock().pop_front());
        }
    }

    fn wait_for_pin_pad(&self, card: &CardInfo, _: Option<&PinInfo>, _: UiResponder) {
        self.record(UiCall::WaitForPinPad(card.reader().name.clone()));
    }

    fn on_verify_pin_failed(&self, retries_left: u8, responder: UiResponder) {
        self.record(UiCall::VerifyPinFailed(retries_left));
        match self.pins.lock().pop_front() {
            Some(pin) => responder.ok(0, Some(pin)),
            None => responder.cancel(),
        }
    }

    fn status_update(&self, status: RetriableError) {
        self.record(UiCall::Status(status));
        if let Some(hook) = &self.on_status {
            hook(status);
        }
    }

    fn show_retriable_error(
        &self,
        error: RetriableError,
        _: &str,
        retry_allowed: bool,
        responder: UiResponder,
    ) {
        self.record(UiCall::RetriableError {
            error,
            retry_allowed,
        });
        if let Some(hook) = &self.on_retriable {
            hook(error);
        }
        if self.retry && retry_allowed {
            responder.retry();
        } else {
            responder.cancel();
        }
    }

    fn show_critical_failure(&self, message: &str) {
        self.record(UiCall::CriticalFailure(message.to_string()));
    }

    fn quit(&self) {
        self.record(UiCall::Quit);
    }
}

pub fn get_signing_certificate_command() -> Command {
    command(json!({
        "command": "get-signing-certificate",
        "arguments": {"origin": ORIGIN}
    }))
}

pub fn authenticate_command() -> Command {
    command(json!({
        "command": "authenticate",
        "arguments": {"origin": ORIGIN, "challengeNonce": NONCE}
    }))
}

pub fn command(value: serde_json::Value) -> Command {
    Command::from_json(&value.to_string()).unwrap()
}

pub fn config(discovery: CardDiscovery) -> ControllerConfig {
    ControllerConfig::default().with_discovery(discovery)
}

pub fn readers() -> (Arc<MockReaders>, MockReaderHandle) {
    let (readers, handle) = MockReaders::new();
    (Arc::new(readers), handle)
}

/// Insert `card` into a reader named `reader`, keeping a typed handle.
pub fn insert(handle: &MockReaderHandle, reader: &str, card: MockCard) -> Arc<MockCard> {
    let card = Arc::new(card);
    handle.insert_card(ReaderInfo::new(reader), card.clone());
    card
}

pub async fn run(controller: &mut Controller) -> Outcome {
    tokio::time::timeout(RUN_TIMEOUT, controller.run())
        .await
        .expect("controller run timed out")
}

/// Assert the invariants of every finished run.
pub fn assert_exited_cleanly(controller: &Controller, ui: &ScriptedUi) {
    assert_eq!(
        controller.state(),
        eidbridge_controller::ControllerState::Exited
    );
    assert_eq!(controller.child_thread_count(), 0);
    assert!(!controller.has_active_handler());
    assert_eq!(ui.calls().last(), Some(&UiCall::Quit));
    assert_eq!(ui.count(|call| *call == UiCall::Quit), 1);
}
