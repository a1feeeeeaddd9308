//! Command orchestration.
//!
//! The [`Controller`] owns one command run: it discovers cards, selects one,
//! drives the command handler through its child-thread steps, reacts to user
//! decisions and card events, and produces the final [`Outcome`].
//!
//! # Event Flow
//!
//! ```text
//! ┌────────────┐  UiResponder   ┌──────────────────┐
//! │ WebEidUi   │───────────────►│                  │
//! └────────────┘                │  ControllerEvent │
//! ┌────────────┐  ChildOutcome  │  channel         │──► Controller::run()
//! │ child      │───────────────►│                  │         ▲
//! │ threads    │                └──────────────────┘         │
//! └────────────┘                                             │
//! ┌────────────┐  MonitorSubscription (until finalization)  │
//! │ CardMonitor│─────────────────────────────────────────────┘
//! └────────────┘
//! ```
//!
//! All controller state is mutated from the task running [`Controller::run`];
//! child threads only ever send one message back.
//!
//! The monitor subscription is opened when the controller first waits for or
//! offers cards. Card lists are only acted on in `Init` and `WaitingForCards`;
//! in the later states the subscription serves removal notices.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use eidbridge_card::{
    CardError, CardErrorClass, CardInfo, CardMonitor, MonitorEvent, MonitorSubscription, Pin,
    PinInfo,
};
use eidbridge_core::{Command, RetriableError};

use crate::child_thread::{ChildThreadId, ChildThreadKind, ChildThreads};
use crate::command_handlers::{
    CertificateReady, CertificateStatus, CommandHandler, HandlerFailure, create_command_handler,
};
use crate::config::{CardDiscovery, ControllerConfig};
use crate::event::{ChildOutcome, ControllerEvent, UiEvent};
use crate::result::{Outcome, ResultMap};
use crate::state_machine::{ControllerState, StateMachine, StateTransition, UserDecision};
use crate::ui::{UiResponder, WebEidUi};

/// Owner of the command handler.
///
/// The handler lives either here (`Idle`) or inside exactly one child
/// thread (`Running`), so at most one handler step is ever active.
enum HandlerSlot {
    Empty,
    Idle(Box<dyn CommandHandler>),
    Running(ChildThreadId),
}

impl HandlerSlot {
    fn take_idle(&mut self) -> Option<Box<dyn CommandHandler>> {
        match mem::replace(self, HandlerSlot::Empty) {
            HandlerSlot::Idle(handler) => Some(handler),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Put a handler returned by child thread `id` back.
    ///
    /// Refused when the slot no longer waits for that thread.
    fn restore(&mut self, id: ChildThreadId, handler: Box<dyn CommandHandler>) -> bool {
        match self {
            HandlerSlot::Running(running) if *running == id => {
                *self = HandlerSlot::Idle(handler);
                true
            }
            _ => false,
        }
    }

    fn idle(&self) -> Option<&dyn CommandHandler> {
        match self {
            HandlerSlot::Idle(handler) => Some(handler.as_ref()),
            _ => None,
        }
    }

    fn running(&self) -> Option<ChildThreadId> {
        match self {
            HandlerSlot::Running(id) => Some(*id),
            _ => None,
        }
    }
}

enum NextEvent {
    Controller(Option<ControllerEvent>),
    Monitor(Option<MonitorEvent>),
}

/// State machine driving one command run.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use eidbridge_card::mock::{MockCard, MockReaders};
/// use eidbridge_card::{CardInfo, ReaderInfo};
/// use eidbridge_controller::{
///     CertificateReady, Controller, ControllerConfig, Outcome, UiResponder, WebEidUi,
/// };
/// use eidbridge_core::{Command, RetriableError};
///
/// struct AutoConfirm;
///
/// impl WebEidUi for AutoConfirm {
///     fn request_card_selection(&self, _: &[Arc<CardInfo>], responder: UiResponder) {
///         responder.ok(0, None);
///     }
///     fn on_certificate_ready(&self, _: &CertificateReady, responder: UiResponder) {
///         responder.ok(0, None);
///     }
///     fn wait_for_pin_pad(&self, _: &CardInfo, _: Option<&eidbridge_card::PinInfo>, _: UiResponder) {}
///     fn on_verify_pin_failed(&self, _: u8, responder: UiResponder) {
///         responder.cancel();
///     }
///     fn status_update(&self, _: RetriableError) {}
///     fn show_retriable_error(&self, _: RetriableError, _: &str, _: bool, responder: UiResponder) {
///         responder.cancel();
///     }
///     fn show_critical_failure(&self, _: &str) {}
///     fn quit(&self) {}
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let (readers, handle) = MockReaders::new();
///     handle.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
///
///     let command = Command::from_json(
///         r#"{"command": "get-signing-certificate", "arguments": {"origin": "https://ria.ee"}}"#,
///     )
///     .unwrap();
///
///     let mut controller = Controller::new(
///         command,
///         Arc::new(AutoConfirm),
///         Arc::new(readers),
///         ControllerConfig::default(),
///     );
///
///     let outcome = controller.run().await;
///     assert!(outcome.result().unwrap().contains_key("certificate"));
/// }
/// ```
pub struct Controller {
    command: Arc<Command>,
    config: ControllerConfig,
    ui: Arc<dyn WebEidUi>,
    monitor: Arc<dyn CardMonitor>,
    state: StateMachine,
    handler: HandlerSlot,
    /// Eligible cards of the current discovery round.
    cards: Vec<Arc<CardInfo>>,
    selected_card: Option<Arc<CardInfo>>,
    pin_info: Option<PinInfo>,
    child_threads: ChildThreads,
    /// Outstanding `WaitForCard` child; other snapshots are stale.
    discovery: Option<ChildThreadId>,
    result: ResultMap,
    outcome: Option<Outcome>,
    subscription: Option<MonitorSubscription>,
    /// Child thread whose retriable failure may be retried by the user.
    retry_target: Option<ChildThreadId>,
    retry_armed: bool,
    retry_count: u32,
    critical_failure_reported: bool,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
    event_rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl Controller {
    pub fn new(
        command: Command,
        ui: Arc<dyn WebEidUi>,
        monitor: Arc<dyn CardMonitor>,
        config: ControllerConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            command: Arc::new(command),
            state: StateMachine::with_history_limit(config.history_limit),
            config,
            ui,
            monitor,
            handler: HandlerSlot::Empty,
            cards: Vec::new(),
            selected_card: None,
            pin_info: None,
            child_threads: ChildThreads::new(event_tx.clone()),
            discovery: None,
            result: ResultMap::new(),
            outcome: None,
            subscription: None,
            retry_target: None,
            retry_armed: false,
            retry_count: 0,
            critical_failure_reported: false,
            event_tx,
            event_rx,
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        *self.state.current_state()
    }

    /// Recent state transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        self.state.history()
    }

    /// Whether the run ever entered `state` (within the history limit).
    pub fn has_visited(&self, state: ControllerState) -> bool {
        self.state.has_visited(state)
    }

    /// Number of registered child threads.
    pub fn child_thread_count(&self) -> usize {
        self.child_threads.len()
    }

    /// Whether a handler step is running on a child thread.
    pub fn has_active_handler(&self) -> bool {
        self.handler.running().is_some()
    }

    pub fn selected_card(&self) -> Option<&Arc<CardInfo>> {
        self.selected_card.as_ref()
    }

    pub fn result(&self) -> &ResultMap {
        &self.result
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Run the command to completion.
    ///
    /// Validates the command arguments, starts card discovery and processes
    /// events until an outcome is decided, then joins all child threads and
    /// exits.
    pub async fn run(&mut self) -> Outcome {
        if self.state() != ControllerState::Init {
            warn!("Controller::run called in state {}", self.state());
            return self.outcome.clone().unwrap_or_else(|| {
                Outcome::CriticalFailure("Controller is already running".to_string())
            });
        }

        self.start();
        self.process_events().await;
        self.wait_for_child_threads().await;
        self.exit()
    }

    fn start(&mut self) {
        info!(
            "Running {} command, {} card discovery",
            self.command.command_type(),
            self.config.discovery()
        );

        match create_command_handler(Arc::clone(&self.command)) {
            Ok(handler) => {
                self.handler = HandlerSlot::Idle(handler);
                self.start_command_execution();
            }
            Err(error) => {
                warn!("Rejecting {} command: {}", self.command.command_type(), error);
                self.finalize(Outcome::ArgumentError(error.to_string()));
            }
        }
    }

    async fn process_events(&mut self) {
        while !self.is_finalizing() {
            // Queued user decisions and child outcomes go before card events.
            let next = match self.subscription.as_mut() {
                Some(subscription) => tokio::select! {
                    biased;
                    event = self.event_rx.recv() => NextEvent::Controller(event),
                    event = subscription.recv() => NextEvent::Monitor(event),
                },
                None => NextEvent::Controller(self.event_rx.recv().await),
            };

            match next {
                NextEvent::Controller(Some(event)) => self.handle_event(event),
                NextEvent::Controller(None) => {
                    self.on_critical_failure("Controller event channel closed");
                }
                NextEvent::Monitor(Some(event)) => self.handle_monitor_event(event),
                NextEvent::Monitor(None) => {
                    warn!("Card monitor closed the subscription");
                    self.subscription = None;
                }
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Ui(UiEvent::Ok {
                selected_index,
                pin,
            }) => self.on_dialog_ok(selected_index, pin),
            ControllerEvent::Ui(UiEvent::Cancel) => self.on_dialog_cancel(),
            ControllerEvent::Ui(UiEvent::Retry) => self.on_retry(),
            ControllerEvent::ChildThread { id, outcome } => self.on_child_thread_finished(id, outcome),
        }
    }

    fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::CardsAvailable(cards) => self.on_cards_available(cards),
            MonitorEvent::CardReady(card) => self.on_card_ready(card),
            MonitorEvent::StatusUpdate(reason) => self.on_reader_monitor_status_update(reason),
            other => debug!("Ignoring monitor event {:?}", other),
        }
    }

    fn start_command_execution(&mut self) {
        match self.config.discovery() {
            CardDiscovery::Synchronous => match self.monitor.available_cards() {
                Ok(cards) => self.on_cards_available(cards),
                Err(error) => self.on_card_discovery_failed(error),
            },
            CardDiscovery::EventDriven => {
                self.enter_waiting_for_cards();
                if self.is_finalizing() {
                    return;
                }
                self.cancel_discovery();
                let monitor = Arc::clone(&self.monitor);
                let id = self
                    .child_threads
                    .spawn(ChildThreadKind::WaitForCard, move |cancel| {
                        if cancel.is_cancelled() {
                            return ChildOutcome::CardsDiscovered(Ok(Vec::new()));
                        }
                        ChildOutcome::CardsDiscovered(monitor.available_cards())
                    });
                self.discovery = Some(id);
            }
        }
    }

    /// Stop waiting for the outstanding card snapshot; its outcome is dropped.
    fn cancel_discovery(&mut self) {
        if let Some(id) = self.discovery.take() {
            self.child_threads.cancel(id);
        }
    }

    fn on_card_discovery_failed(&mut self, error: CardError) {
        let state = self.state();
        if !matches!(state, ControllerState::Init | ControllerState::WaitingForCards) {
            debug!("Ignoring card discovery failure in state {}: {}", state, error);
            return;
        }
        match error.classify() {
            CardErrorClass::Retriable(reason) => {
                warn!("Card discovery failed: {}", error);
                self.enter_waiting_for_cards();
                self.ui.status_update(reason);
            }
            _ => self.on_critical_failure(format!("Card discovery failed: {}", error)),
        }
    }

    /// Cards reported by discovery or the monitor.
    ///
    /// Keeps the cards holding the certificate the command needs: none puts
    /// the controller back to waiting, exactly one is used directly, several
    /// are offered to the user.
    pub fn on_cards_available(&mut self, cards: Vec<Arc<CardInfo>>) {
        let state = self.state();
        if !matches!(state, ControllerState::Init | ControllerState::WaitingForCards) {
            debug!("Ignoring {} available cards in state {}", cards.len(), state);
            return;
        }
        let Some(certificate_type) = self.handler.idle().map(|h| h.certificate_type()) else {
            warn!("Ignoring available cards: no idle command handler");
            return;
        };

        let total = cards.len();
        let eligible: Vec<_> = cards
            .into_iter()
            .filter(|card| !card.is_removed() && card.supports(certificate_type))
            .collect();
        debug!(
            "{} of {} cards hold a {} certificate",
            eligible.len(),
            total,
            certificate_type
        );

        match eligible.len() {
            0 => {
                self.enter_waiting_for_cards();
                self.ui.status_update(if total == 0 {
                    RetriableError::NoSmartCardsFound
                } else {
                    RetriableError::SmartCardChangeRequired
                });
            }
            1 => {
                self.cards = eligible;
                self.bind_card(0);
            }
            count => {
                self.cards = eligible;
                if self.transition(ControllerState::SelectingCard) {
                    info!("{} cards available, requesting selection", count);
                    self.ui.request_card_selection(&self.cards, self.responder());
                }
            }
        }
    }

    /// A single card became ready.
    pub fn on_card_ready(&mut self, card: Arc<CardInfo>) {
        self.on_cards_available(vec![card]);
    }

    /// Reader or card status change from the monitor.
    ///
    /// Forwarded to the UI. Removal of the selected card while its handler is
    /// in flight discards the handler and waits for cards again; removal of
    /// an offered card closes the selection and rediscovers.
    pub fn on_reader_monitor_status_update(&mut self, reason: RetriableError) {
        if self.is_finalizing() {
            debug!("Ignoring reader status {} after the final result", reason);
            return;
        }

        info!("Reader status: {}", reason);
        self.ui.status_update(reason);

        if reason != RetriableError::SmartCardWasRemoved {
            return;
        }

        let state = self.state();
        let selected_removed = self
            .selected_card
            .as_ref()
            .is_some_and(|card| card.is_removed());

        if selected_removed && state.is_handler_in_flight() {
            warn!("Selected card removed in state {}, waiting for cards", state);
            self.reset_handler();
            self.enter_waiting_for_cards();
        } else if state == ControllerState::SelectingCard
            && self.cards.iter().any(|card| card.is_removed())
        {
            info!("Card removed during selection, discovering cards again");
            self.cards.clear();
            self.enter_waiting_for_cards();
            self.start_command_execution();
        }
    }

    /// Resolve a pending card selection.
    pub fn on_confirm_command_handler(&mut self, selected_index: usize) {
        if self.state() != ControllerState::SelectingCard {
            debug!("Ignoring card selection in state {}", self.state());
            return;
        }
        self.bind_card(selected_index);
    }

    fn bind_card(&mut self, index: usize) {
        let Some(card) = self.cards.get(index).cloned() else {
            self.on_critical_failure(format!(
                "Selected card index {} is out of range ({} cards)",
                index,
                self.cards.len()
            ));
            return;
        };

        info!("Using {}", card);
        self.cancel_discovery();
        self.selected_card = Some(card);
        if self.transition(ControllerState::HandlerSelected) {
            self.run_command_handler();
        }
    }

    fn run_command_handler(&mut self) {
        let Some(card) = self.selected_card.clone() else {
            self.on_critical_failure("No card selected for the command handler");
            return;
        };
        let Some(mut handler) = self.handler.take_idle() else {
            self.on_critical_failure("No idle command handler to run");
            return;
        };

        if let Err(error) = handler.connect_signals(Arc::clone(&self.ui), self.responder()) {
            self.on_critical_failure(error.to_string());
            return;
        }

        let id = self
            .child_threads
            .spawn(ChildThreadKind::CommandHandlerRun, move |cancel| {
                let result = handler.run(&card, &cancel);
                ChildOutcome::HandlerRun { handler, result }
            });
        self.handler = HandlerSlot::Running(id);
        self.connect_retry(id);
        self.transition(ControllerState::AwaitingChildThreads);
    }

    fn confirm_command_handler(&mut self, pin: Option<Pin>) {
        let Some(card) = self.selected_card.clone() else {
            self.on_critical_failure("No card selected for confirmation");
            return;
        };
        let Some(needs_pin) = self.handler.idle().map(|h| h.needs_pin()) else {
            self.on_critical_failure("No idle command handler to confirm");
            return;
        };

        let pin_pad = needs_pin
            && (card.reader().has_pin_pad
                || self.pin_info.is_some_and(|info| info.reader_has_pin_pad));

        if needs_pin && !pin_pad && pin.as_ref().is_none_or(Pin::is_empty) {
            warn!("PIN required but none entered");
            let retries_left = self.pin_info.map_or(0, |info| info.retries_left);
            self.ui.on_verify_pin_failed(retries_left, self.responder());
            return;
        }
        let pin = if pin_pad { None } else { pin };

        let Some(mut handler) = self.handler.take_idle() else {
            self.on_critical_failure("No idle command handler to confirm");
            return;
        };
        let child_card = Arc::clone(&card);
        let id = self
            .child_threads
            .spawn(ChildThreadKind::CommandHandlerConfirm, move |cancel| {
                let result = handler.on_confirm(&child_card, pin.as_ref(), &cancel);
                ChildOutcome::HandlerConfirm { handler, result }
            });
        self.handler = HandlerSlot::Running(id);
        self.connect_retry(id);

        if pin_pad {
            if self.transition(ControllerState::AwaitingUserDecision(UserDecision::PinPad)) {
                self.ui
                    .wait_for_pin_pad(&card, self.pin_info.as_ref(), self.responder());
            }
        } else {
            self.transition(ControllerState::AwaitingChildThreads);
        }
    }

    fn on_child_thread_finished(&mut self, id: ChildThreadId, outcome: ChildOutcome) {
        let Some(kind) = self.child_threads.complete(id) else {
            debug!("Ignoring outcome of unknown child thread {}", id);
            return;
        };

        let retry_allowed = self.retry_target == Some(id);
        if retry_allowed {
            self.disconnect_retry();
        }

        if self.is_finalizing() {
            debug!("Discarding {} outcome after finalization", kind);
            return;
        }
        trace!("{} child thread {} finished: {:?}", kind, id, outcome);

        match outcome {
            ChildOutcome::CardsDiscovered(result) => {
                if self.discovery != Some(id) {
                    debug!("Dropping stale card snapshot from child thread {}", id);
                    return;
                }
                self.discovery = None;
                match result {
                    Ok(cards) => self.on_cards_available(cards),
                    Err(error) => self.on_card_discovery_failed(error),
                }
            }
            ChildOutcome::HandlerRun { handler, result } => {
                if !self.handler.restore(id, handler) {
                    debug!("Dropping stale handler from child thread {}", id);
                    return;
                }
                match result {
                    Ok(ready) => self.on_certificate_ready(ready, retry_allowed),
                    Err(failure) => self.on_handler_failure(failure, retry_allowed),
                }
            }
            ChildOutcome::HandlerConfirm { handler, result } => {
                if !self.handler.restore(id, handler) {
                    debug!("Dropping stale handler from child thread {}", id);
                    return;
                }
                match result {
                    Ok(partial) => self.on_command_handler_confirm_completed(partial),
                    Err(failure) => self.on_handler_failure(failure, retry_allowed),
                }
            }
            ChildOutcome::Panicked(message) => {
                self.on_critical_failure(format!("{} child thread {} panicked: {}", kind, id, message));
            }
        }
    }

    fn on_certificate_ready(&mut self, ready: CertificateReady, retry_allowed: bool) {
        self.pin_info = Some(ready.pin_info);
        let mut needs_pin = false;
        if let Some(handler) = self.handler.idle() {
            needs_pin = handler.needs_pin();
            handler.signals().certificate_ready(&ready);
        }

        match ready.status {
            CertificateStatus::Valid if needs_pin && ready.pin_info.is_blocked() => self.on_handler_failure(
                HandlerFailure::retriable(RetriableError::PinBlocked, "The PIN is blocked"),
                retry_allowed,
            ),
            CertificateStatus::Valid => {
                self.transition(ControllerState::AwaitingUserDecision(UserDecision::Confirm));
            }
            status => self.on_handler_failure(
                HandlerFailure::retriable(
                    RetriableError::NoValidCertificateAvailable,
                    format!("The {} certificate is {}", ready.certificate_info.certificate_type, status),
                ),
                retry_allowed,
            ),
        }
    }

    fn on_handler_failure(&mut self, failure: HandlerFailure, retry_allowed: bool) {
        match failure {
            HandlerFailure::Retriable { error, message } => {
                warn!("Retriable failure: {} ({})", error, message);
                let delivered = self
                    .handler
                    .idle()
                    .is_some_and(|h| h.signals().retriable_failure(error, &message, retry_allowed));
                if !delivered {
                    self.ui
                        .show_retriable_error(error, &message, retry_allowed, self.responder());
                }

                self.retry_armed = retry_allowed;
                if error.requires_card_event() {
                    self.reset_handler();
                    self.enter_waiting_for_cards();
                    self.ui.status_update(error);
                } else {
                    self.transition(ControllerState::AwaitingUserDecision(UserDecision::Retry));
                }
            }
            HandlerFailure::PinRetryAllowed { retries_left } => {
                info!("Wrong PIN, {} retries left", retries_left);
                if self.transition(ControllerState::AwaitingUserDecision(UserDecision::Confirm)) {
                    self.ui.on_verify_pin_failed(retries_left, self.responder());
                }
            }
            HandlerFailure::UserCancelled => self.on_dialog_cancel(),
            HandlerFailure::Aborted => {
                self.on_critical_failure("Command handler step aborted while still in use");
            }
            HandlerFailure::Critical(message) => self.on_critical_failure(message),
        }
    }

    /// Merge a confirmation result and finish the run.
    pub fn on_command_handler_confirm_completed(&mut self, partial: ResultMap) {
        if let Err(error) = self.result.merge(partial) {
            self.on_critical_failure(format!("Conflicting command result: {}", error));
            return;
        }

        info!(
            "{} command completed with {} result fields",
            self.command.command_type(),
            self.result.len()
        );
        self.finalize(Outcome::Success(self.result.clone()));
    }

    /// The user asked to retry after a retriable failure.
    ///
    /// Honoured only while a retriable failure is pending and the retry
    /// limit is not exceeded.
    pub fn on_retry(&mut self) {
        let state = self.state();
        let waiting = matches!(
            state,
            ControllerState::WaitingForCards
                | ControllerState::AwaitingUserDecision(UserDecision::Retry)
        );
        if !self.retry_armed || !waiting {
            debug!("Ignoring retry in state {}", state);
            return;
        }

        self.retry_armed = false;
        self.retry_count += 1;
        if self.retry_count > self.config.max_retries {
            self.on_critical_failure(format!(
                "Retry limit of {} exceeded",
                self.config.max_retries
            ));
            return;
        }

        info!(
            "Retrying {} command (attempt {} of {})",
            self.command.command_type(),
            self.retry_count,
            self.config.max_retries
        );
        self.reset_handler();
        if self.is_finalizing() {
            return;
        }
        self.enter_waiting_for_cards();
        self.start_command_execution();
    }

    /// OK pressed: resolves a card selection or confirms the certificate.
    pub fn on_dialog_ok(&mut self, selected_index: usize, pin: Option<Pin>) {
        match self.state() {
            ControllerState::SelectingCard => self.on_confirm_command_handler(selected_index),
            ControllerState::AwaitingUserDecision(UserDecision::Confirm) => {
                self.confirm_command_handler(pin)
            }
            state => debug!("Ignoring OK in state {}", state),
        }
    }

    /// Cancel pressed, in any state before finalization.
    pub fn on_dialog_cancel(&mut self) {
        if self.is_finalizing() {
            return;
        }
        info!("User cancelled in state {}", self.state());
        self.finalize(Outcome::Cancelled);
    }

    /// Unrecoverable failure: report once and finish without a result.
    pub fn on_critical_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.critical_failure_reported || self.is_finalizing() {
            debug!("Ignoring critical failure after finalization: {}", message);
            return;
        }
        self.critical_failure_reported = true;

        error!("Critical failure: {}", message);
        self.ui.show_critical_failure(&message);
        self.result = ResultMap::new();
        self.finalize(Outcome::CriticalFailure(message));
    }

    /// Discard the handler and the card choice, keeping the command.
    fn reset_handler(&mut self) {
        if let Some(id) = self.handler.running() {
            self.child_threads.cancel(id);
        }
        self.disconnect_retry();
        self.cards.clear();
        self.selected_card = None;
        self.pin_info = None;

        match create_command_handler(Arc::clone(&self.command)) {
            Ok(handler) => self.handler = HandlerSlot::Idle(handler),
            Err(error) => {
                self.handler = HandlerSlot::Empty;
                self.on_critical_failure(format!("Failed to recreate command handler: {}", error));
            }
        }
    }

    fn enter_waiting_for_cards(&mut self) {
        if self.state() != ControllerState::WaitingForCards {
            self.transition(ControllerState::WaitingForCards);
        }
    }

    fn subscribe_to_monitor(&mut self) {
        if self.subscription.is_none() {
            debug!("Subscribing to card monitor");
            self.subscription = Some(self.monitor.subscribe());
        }
    }

    fn connect_retry(&mut self, id: ChildThreadId) {
        self.retry_target = Some(id);
    }

    fn disconnect_retry(&mut self) {
        self.retry_target = None;
    }

    fn transition(&mut self, to: ControllerState) -> bool {
        let dwell = self.state.time_in_current_state();
        match self.state.transition_to(to) {
            Ok(transition) => {
                debug!(
                    "Controller state {} -> {} after {:?}",
                    transition.from, transition.to, dwell
                );
                if matches!(
                    to,
                    ControllerState::WaitingForCards | ControllerState::SelectingCard
                ) || to.is_handler_in_flight()
                {
                    self.subscribe_to_monitor();
                }
                if !matches!(
                    to,
                    ControllerState::WaitingForCards
                        | ControllerState::AwaitingUserDecision(UserDecision::Retry)
                ) {
                    self.retry_armed = false;
                }
                true
            }
            Err(error) => {
                self.on_critical_failure(error.to_string());
                false
            }
        }
    }

    fn finalize(&mut self, outcome: Outcome) {
        if self.is_finalizing() {
            return;
        }

        self.child_threads.cancel_all();
        self.discovery = None;
        self.disconnect_retry();
        self.retry_armed = false;
        self.subscription = None;
        self.outcome = Some(outcome);

        if let Err(error) = self.state.transition_to(ControllerState::Finalizing) {
            error!("{}", error);
        }
    }

    async fn wait_for_child_threads(&mut self) {
        if !self.child_threads.is_empty() {
            debug!("Waiting for {} child threads", self.child_threads.len());
        }

        let report = self.child_threads.wait_for_child_threads().await;
        debug!(
            "Child threads joined: {} completed, {} cancelled, {} panicked",
            report.completed, report.cancelled, report.panicked
        );

        while let Ok(event) = self.event_rx.try_recv() {
            trace!("Discarding {:?} after shutdown", event);
        }
    }

    fn exit(&mut self) -> Outcome {
        self.subscription = None;
        self.disconnect_retry();
        self.retry_armed = false;

        let outcome = self.outcome.clone().unwrap_or_else(|| {
            Outcome::CriticalFailure("Controller finished without an outcome".to_string())
        });
        self.outcome = Some(outcome.clone());

        if let Err(error) = self.state.transition_to(ControllerState::Exited) {
            warn!("{}", error);
        }
        info!("{} command finished: {:?}", self.command.command_type(), outcome_label(&outcome));

        self.ui.quit();
        outcome
    }

    fn is_finalizing(&self) -> bool {
        matches!(
            self.state(),
            ControllerState::Finalizing | ControllerState::Exited
        )
    }

    fn responder(&self) -> UiResponder {
        UiResponder::new(self.event_tx.clone())
    }
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success(_) => "success",
        Outcome::Cancelled => "cancelled",
        Outcome::ArgumentError(_) => "argument error",
        Outcome::CriticalFailure(_) => "critical failure",
    }
}
