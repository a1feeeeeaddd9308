//! End-to-end controller runs against mock readers.
//!
//! Each test drives a full `Controller::run` with a scripted UI and checks
//! the outcome, the dialog sequence and the shutdown invariants.

mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rstest::rstest;
use serde_json::json;

use common::*;
use eidbridge_card::mock::{EXPIRED_SIGNING_CERTIFICATE, MockCard, SIGNING_CERTIFICATE};
use eidbridge_card::{
    CardCapabilities, CardError, CardResult, CertificateType, HashAlgorithm,
    JsonWebSignatureAlgorithm, Pin, PinInfo, ReaderInfo, SignatureAlgorithm, SmartCard,
};
use eidbridge_controller::{
    CardDiscovery, CertificateStatus, Controller, ControllerState, Outcome, UserDecision,
};
use eidbridge_core::RetriableError;

#[rstest]
#[case::synchronous(CardDiscovery::Synchronous)]
#[case::event_driven(CardDiscovery::EventDriven)]
#[tokio::test]
async fn test_card_inserted_while_waiting(#[case] discovery: CardDiscovery) {
    let (readers, handle) = readers();
    let inserter = handle.clone();
    let ui = Arc::new(ScriptedUi::new().on_status(move |status| {
        if status == RetriableError::NoSmartCardsFound {
            inserter.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
        }
    }));

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(discovery),
    );
    let outcome = run(&mut controller).await;

    let result = outcome.result().expect("successful outcome");
    assert_eq!(
        result.get("certificate"),
        Some(&json!(STANDARD.encode(SIGNING_CERTIFICATE)))
    );
    assert!(result.contains_key("supportedSignatureAlgorithms"));
    assert!(controller.has_visited(ControllerState::WaitingForCards));
    assert_eq!(ui.calls()[0], UiCall::Status(RetriableError::NoSmartCardsFound));
    assert_eq!(ui.count(|call| matches!(call, UiCall::CardSelection(_))), 0);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_user_selects_second_of_two_cards() {
    let (readers, handle) = readers();
    let first = insert(&handle, "Reader 0", MockCard::esteid());
    let second = insert(&handle, "Reader 1", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().selecting(1).with_pins([AUTH_PIN]));

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CardSelection(_))),
        1
    );
    assert!(ui.calls().contains(&UiCall::CardSelection(vec![
        "Reader 0".to_string(),
        "Reader 1".to_string()
    ])));
    assert_eq!(
        controller.selected_card().map(|card| card.reader().name.as_str()),
        Some("Reader 1")
    );
    assert_eq!(first.signature_count(), 0);
    assert_eq!(second.signature_count(), 1);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_single_eligible_card_is_selected_without_asking() {
    let (readers, handle) = readers();
    insert(&handle, "Reader 0", MockCard::signing_only());
    let card = insert(&handle, "Reader 1", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().with_pins([AUTH_PIN]));

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    let result = outcome.result().expect("successful outcome");
    for key in ["unverifiedCertificate", "algorithm", "signature", "format", "appVersion"] {
        assert!(result.contains_key(key), "missing {}", key);
    }
    assert_eq!(result.get("algorithm"), Some(&json!("ES384")));
    assert_eq!(ui.count(|call| matches!(call, UiCall::CardSelection(_))), 0);
    assert!(!controller.has_visited(ControllerState::SelectingCard));
    assert_eq!(card.signature_count(), 1);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_retry_after_card_removed_during_run() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    card.fail_next(CardError::card_removed("Reader 0"));

    let reinserter = handle.clone();
    let ui = Arc::new(ScriptedUi::new().retrying().on_retriable(move |error| {
        if error == RetriableError::SmartCardWasRemoved {
            reinserter.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
        }
    }));

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert_eq!(controller.retry_count(), 1);
    assert!(controller.has_visited(ControllerState::WaitingForCards));
    let calls = ui.calls();
    assert!(calls.contains(&UiCall::RetriableError {
        error: RetriableError::SmartCardWasRemoved,
        retry_allowed: true,
    }));
    assert!(calls.contains(&UiCall::Status(RetriableError::SmartCardWasRemoved)));
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CertificateReady { .. })),
        1
    );
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_critical_card_failure_ends_run_without_result() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    card.fail_next(CardError::other("card firmware fault"));
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(matches!(outcome, Outcome::CriticalFailure(ref message) if message.contains("card firmware fault")));
    assert!(outcome.result().is_none());
    assert!(controller.result().is_empty());
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CriticalFailure(_))),
        1
    );
    assert_exited_cleanly(&controller, &ui);
}

/// Card whose certificate read panics.
#[derive(Debug)]
struct PanickingCard;

impl SmartCard for PanickingCard {
    fn name(&self) -> &str {
        "Panicking card"
    }

    fn capabilities(&self) -> CardCapabilities {
        CardCapabilities::all()
    }

    fn read_certificate(&self, _: CertificateType) -> CardResult<Vec<u8>> {
        panic!("reader driver crashed")
    }

    fn pin_info(&self, _: CertificateType) -> CardResult<PinInfo> {
        Err(CardError::other("unreachable"))
    }

    fn auth_signature_algorithm(&self) -> JsonWebSignatureAlgorithm {
        JsonWebSignatureAlgorithm::ES384
    }

    fn supported_signature_algorithms(&self) -> Vec<SignatureAlgorithm> {
        Vec::new()
    }

    fn sign_with_auth_key(&self, _: Option<&Pin>, _: &[u8]) -> CardResult<Vec<u8>> {
        Err(CardError::other("unreachable"))
    }

    fn sign_with_signing_key(
        &self,
        _: Option<&Pin>,
        _: &[u8],
        _: HashAlgorithm,
    ) -> CardResult<(Vec<u8>, SignatureAlgorithm)> {
        Err(CardError::other("unreachable"))
    }
}

#[tokio::test]
async fn test_child_thread_panic_is_critical() {
    let (readers, handle) = readers();
    handle.insert_card(ReaderInfo::new("Reader 0"), Arc::new(PanickingCard));
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(matches!(outcome, Outcome::CriticalFailure(ref message) if message.contains("panicked")));
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CriticalFailure(_))),
        1
    );
    assert_exited_cleanly(&controller, &ui);
}

#[rstest]
#[case::short_nonce(json!({
    "command": "authenticate",
    "arguments": {"origin": ORIGIN, "challengeNonce": "too short"}
}))]
#[case::missing_origin(json!({
    "command": "get-signing-certificate",
    "arguments": {}
}))]
#[case::http_origin(json!({
    "command": "get-signing-certificate",
    "arguments": {"origin": "http://ria.ee"}
}))]
#[case::bad_hash(json!({
    "command": "sign",
    "arguments": {
        "origin": ORIGIN,
        "hash": STANDARD.encode([0u8; 20]),
        "hashFunction": "SHA-256",
        "certificate": STANDARD.encode(SIGNING_CERTIFICATE)
    }
}))]
#[tokio::test]
async fn test_argument_error_before_card_access(#[case] value: serde_json::Value) {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    card.fail_next(CardError::other("card must not be touched"));
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        command(value),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(matches!(outcome, Outcome::ArgumentError(_)));
    assert_eq!(ui.calls(), vec![UiCall::Quit]);
    assert!(!controller.has_visited(ControllerState::HandlerSelected));
    assert_eq!(handle.subscriber_count(), 0);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_cancel_at_confirmation() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().cancelling_on_certificate());

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert!(controller.result().is_empty());
    assert_eq!(card.signature_count(), 0);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_wrong_pin_then_correct_pin() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().with_pins(["0000", AUTH_PIN]));

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert!(ui.calls().contains(&UiCall::VerifyPinFailed(2)));
    assert_eq!(card.retries_left(CertificateType::Authentication), 3);
    assert_eq!(card.signature_count(), 1);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_wrong_pin_without_another_attempt_cancels() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().with_pins(["0000"]));

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(card.retries_left(CertificateType::Authentication), 2);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_pin_pad_reader() {
    let (readers, handle) = readers();
    let card = Arc::new(MockCard::esteid());
    handle.insert_card(ReaderInfo::new("PIN-pad reader").with_pin_pad(), card.clone());
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        authenticate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::EventDriven),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert!(ui.calls().contains(&UiCall::WaitForPinPad("PIN-pad reader".to_string())));
    assert!(controller.has_visited(ControllerState::AwaitingUserDecision(UserDecision::PinPad)));
    assert_eq!(card.signature_count(), 1);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_expired_certificate_is_retriable() {
    let (readers, handle) = readers();
    insert(
        &handle,
        "Reader 0",
        MockCard::esteid().with_expired_signing_certificate(),
    );
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert_eq!(outcome, Outcome::Cancelled);
    let calls = ui.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        UiCall::CertificateReady {
            status: CertificateStatus::Expired,
            ..
        }
    )));
    assert!(calls.contains(&UiCall::RetriableError {
        error: RetriableError::NoValidCertificateAvailable,
        retry_allowed: true,
    }));
    assert!(controller.has_visited(ControllerState::AwaitingUserDecision(UserDecision::Retry)));
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_retry_limit_is_critical() {
    let (readers, handle) = readers();
    insert(
        &handle,
        "Reader 0",
        MockCard::esteid().with_expired_signing_certificate(),
    );
    let ui = Arc::new(ScriptedUi::new().retrying());

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous).with_max_retries(1),
    );
    let outcome = run(&mut controller).await;

    assert_eq!(
        outcome,
        Outcome::CriticalFailure("Retry limit of 1 exceeded".to_string())
    );
    assert_eq!(controller.retry_count(), 2);
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CertificateReady { .. })),
        2
    );
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_sign() {
    let (readers, handle) = readers();
    let card = insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new().with_pins([SIGNING_PIN]));

    let mut controller = Controller::new(
        command(json!({
            "command": "sign",
            "arguments": {
                "origin": ORIGIN,
                "hash": STANDARD.encode([1u8; 48]),
                "hashFunction": "SHA-384",
                "certificate": STANDARD.encode(SIGNING_CERTIFICATE)
            }
        })),
        ui.clone(),
        readers,
        config(CardDiscovery::EventDriven),
    );
    let outcome = run(&mut controller).await;

    let result = outcome.result().expect("successful outcome");
    assert!(result.contains_key("signature"));
    assert_eq!(
        result.get("signatureAlgorithm"),
        Some(&json!({
            "cryptoAlgorithm": "ECC",
            "hashFunction": "SHA-384",
            "paddingScheme": "NONE"
        }))
    );
    assert_eq!(card.signature_count(), 1);
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_sign_with_other_certificate_is_retriable() {
    let (readers, handle) = readers();
    insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        command(json!({
            "command": "sign",
            "arguments": {
                "origin": ORIGIN,
                "hash": STANDARD.encode([1u8; 32]),
                "hashFunction": "SHA-256",
                "certificate": STANDARD.encode(EXPIRED_SIGNING_CERTIFICATE)
            }
        })),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert_eq!(outcome, Outcome::Cancelled);
    assert!(ui.calls().contains(&UiCall::RetriableError {
        error: RetriableError::NoValidCertificateAvailable,
        retry_allowed: true,
    }));
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_service_started_while_waiting() {
    let (readers, handle) = readers();
    insert(&handle, "Reader 0", MockCard::esteid());
    handle.set_service_running(false);

    let starter = handle.clone();
    let ui = Arc::new(ScriptedUi::new().on_status(move |status| {
        if status == RetriableError::SmartCardServiceIsNotRunning {
            starter.set_service_running(true);
        }
    }));

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert_eq!(
        ui.calls()[0],
        UiCall::Status(RetriableError::SmartCardServiceIsNotRunning)
    );
    assert_exited_cleanly(&controller, &ui);
}

#[rstest]
#[case::synchronous(CardDiscovery::Synchronous)]
#[case::event_driven(CardDiscovery::EventDriven)]
#[tokio::test]
async fn test_card_removed_during_selection(#[case] discovery: CardDiscovery) {
    let (readers, handle) = readers();
    insert(&handle, "Reader 0", MockCard::esteid());
    insert(&handle, "Reader 1", MockCard::esteid());

    let remover = handle.clone();
    let ui = Arc::new(ScriptedUi::new().on_selection(move |_| {
        remover.remove_card("Reader 1");
    }));

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(discovery),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert_eq!(
        ui.count(|call| matches!(call, UiCall::CardSelection(_))),
        1
    );
    let calls = ui.calls();
    let selection = calls
        .iter()
        .position(|call| *call == UiCall::CardSelection(vec!["Reader 0".into(), "Reader 1".into()]))
        .expect("selection dialog shown");
    let removal = calls
        .iter()
        .position(|call| *call == UiCall::Status(RetriableError::SmartCardWasRemoved))
        .expect("removal reported");
    assert!(selection < removal);
    assert!(controller.history().iter().any(|transition| {
        transition.from == ControllerState::SelectingCard
            && transition.to == ControllerState::WaitingForCards
    }));
    assert_eq!(controller.selected_card().unwrap().reader().name, "Reader 0");
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_reader_status_forwarded_while_waiting() {
    let (readers, handle) = readers();
    let reporter = handle.clone();
    let ui = Arc::new(ScriptedUi::new().on_status(move |status| match status {
        RetriableError::NoSmartCardsFound => {
            reporter.report_status(RetriableError::NoSmartCardReadersFound);
        }
        RetriableError::NoSmartCardReadersFound => {
            reporter.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
        }
        _ => {}
    }));

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui.clone(),
        readers,
        config(CardDiscovery::EventDriven),
    );
    let outcome = run(&mut controller).await;

    assert!(outcome.is_success());
    assert_eq!(
        ui.calls()[..2],
        [
            UiCall::Status(RetriableError::NoSmartCardsFound),
            UiCall::Status(RetriableError::NoSmartCardReadersFound),
        ]
    );
    assert_exited_cleanly(&controller, &ui);
}

#[tokio::test]
async fn test_outcome_serialization() {
    let (readers, handle) = readers();
    insert(&handle, "Reader 0", MockCard::esteid());
    let ui = Arc::new(ScriptedUi::new());

    let mut controller = Controller::new(
        get_signing_certificate_command(),
        ui,
        readers,
        config(CardDiscovery::Synchronous),
    );
    let outcome = run(&mut controller).await;

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["outcome"], json!("success"));
    assert_eq!(
        value["payload"]["certificate"],
        json!(STANDARD.encode(SIGNING_CERTIFICATE))
    );
}
