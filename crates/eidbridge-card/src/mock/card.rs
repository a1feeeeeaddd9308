//! Mock smart card implementation for testing and development.
//!
//! The mock card holds real DER certificates, keeps PIN retry counters and
//! produces deterministic pseudo-signatures derived from the signed hash.
//! Failures can be injected with [`MockCard::fail_next`].

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha384};
use tracing::{debug, trace};

use crate::error::{CardError, CardResult};
use crate::traits::SmartCard;
use crate::types::{
    CardCapabilities, CertificateType, HashAlgorithm, JsonWebSignatureAlgorithm, Pin, PinInfo,
    SignatureAlgorithm,
};

/// Authentication certificate of the default mock card (P-384, digitalSignature).
pub const AUTH_CERTIFICATE: &[u8] = include_bytes!("testdata/auth-cert.der");

/// Signing certificate of the default mock card (P-384, nonRepudiation).
pub const SIGNING_CERTIFICATE: &[u8] = include_bytes!("testdata/sign-cert.der");

/// Signing certificate that expired in 2021.
pub const EXPIRED_SIGNING_CERTIFICATE: &[u8] = include_bytes!("testdata/sign-cert-expired.der");

const DEFAULT_AUTH_PIN: &str = "1234";
const DEFAULT_SIGNING_PIN: &str = "12345";
const DEFAULT_MAX_PIN_RETRIES: u8 = 3;

/// What the simulated PIN-pad enters when an operation asks for PIN-pad input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinPadInput {
    /// The user types the correct PIN.
    CorrectPin,

    /// The user types the given PIN.
    Pin(Pin),

    /// The user presses cancel on the reader.
    Cancel,
}

#[derive(Debug)]
struct KeySlot {
    certificate: Option<Vec<u8>>,
    pin: Pin,
    min_pin_length: u8,
    max_pin_length: u8,
}

#[derive(Debug)]
struct MockCardState {
    auth_retries_left: u8,
    signing_retries_left: u8,
    fail_next: Option<CardError>,
    signature_count: usize,
    capability_queries: usize,
}

/// Mock smart card for testing and development.
///
/// # Examples
///
/// ```
/// use eidbridge_card::mock::MockCard;
/// use eidbridge_card::{CertificateType, Pin, SmartCard};
///
/// let card = MockCard::esteid();
/// let certificate = card.read_certificate(CertificateType::Authentication).unwrap();
/// assert!(!certificate.is_empty());
///
/// let signature = card.sign_with_auth_key(Some(&Pin::new("1234")), &[0u8; 48]).unwrap();
/// assert_eq!(signature.len(), 96);
/// ```
#[derive(Debug)]
pub struct MockCard {
    name: String,
    auth: KeySlot,
    signing: KeySlot,
    auth_algorithm: JsonWebSignatureAlgorithm,
    max_pin_retries: u8,
    pin_pad_input: PinPadInput,
    delay: Option<Duration>,
    state: Mutex<MockCardState>,
}

impl MockCard {
    /// Create a card holding both mock certificates.
    ///
    /// Authentication PIN is `1234`, signing PIN is `12345`.
    pub fn esteid() -> Self {
        Self {
            name: "Mock EstEID".to_string(),
            auth: KeySlot {
                certificate: Some(AUTH_CERTIFICATE.to_vec()),
                pin: Pin::new(DEFAULT_AUTH_PIN),
                min_pin_length: 4,
                max_pin_length: 12,
            },
            signing: KeySlot {
                certificate: Some(SIGNING_CERTIFICATE.to_vec()),
                pin: Pin::new(DEFAULT_SIGNING_PIN),
                min_pin_length: 5,
                max_pin_length: 12,
            },
            auth_algorithm: JsonWebSignatureAlgorithm::ES384,
            max_pin_retries: DEFAULT_MAX_PIN_RETRIES,
            pin_pad_input: PinPadInput::CorrectPin,
            delay: None,
            state: Mutex::new(MockCardState {
                auth_retries_left: DEFAULT_MAX_PIN_RETRIES,
                signing_retries_left: DEFAULT_MAX_PIN_RETRIES,
                fail_next: None,
                signature_count: 0,
                capability_queries: 0,
            }),
        }
    }

    /// Set the card type name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace (or remove, with `None`) the certificate in a key slot.
    pub fn with_certificate(
        mut self,
        certificate_type: CertificateType,
        certificate: Option<Vec<u8>>,
    ) -> Self {
        self.slot_mut(certificate_type).certificate = certificate;
        self
    }

    /// Card with a signing certificate only.
    pub fn signing_only() -> Self {
        Self::esteid()
            .with_name("Mock EstEID (signing only)")
            .with_certificate(CertificateType::Authentication, None)
    }

    /// Card with an authentication certificate only.
    pub fn authentication_only() -> Self {
        Self::esteid()
            .with_name("Mock EstEID (authentication only)")
            .with_certificate(CertificateType::Signing, None)
    }

    /// Card whose signing certificate has expired.
    pub fn with_expired_signing_certificate(self) -> Self {
        self.with_certificate(
            CertificateType::Signing,
            Some(EXPIRED_SIGNING_CERTIFICATE.to_vec()),
        )
    }

    pub fn with_pin(mut self, certificate_type: CertificateType, pin: Pin) -> Self {
        self.slot_mut(certificate_type).pin = pin;
        self
    }

    pub fn with_auth_algorithm(mut self, algorithm: JsonWebSignatureAlgorithm) -> Self {
        self.auth_algorithm = algorithm;
        self
    }

    /// Set what the PIN-pad enters for operations without an explicit PIN.
    pub fn with_pin_pad_input(mut self, input: PinPadInput) -> Self {
        self.pin_pad_input = input;
        self
    }

    /// Simulate slow card I/O by sleeping before every operation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next card operation with `error`.
    pub fn fail_next(&self, error: CardError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Remaining PIN attempts for the key of the given type.
    pub fn retries_left(&self, certificate_type: CertificateType) -> u8 {
        let state = self.state.lock();
        match certificate_type {
            CertificateType::Authentication => state.auth_retries_left,
            CertificateType::Signing => state.signing_retries_left,
        }
    }

    /// Number of signatures produced so far.
    pub fn signature_count(&self) -> usize {
        self.state.lock().signature_count
    }

    /// Number of times the certificate slots were queried.
    pub fn capability_queries(&self) -> usize {
        self.state.lock().capability_queries
    }

    fn slot(&self, certificate_type: CertificateType) -> &KeySlot {
        match certificate_type {
            CertificateType::Authentication => &self.auth,
            CertificateType::Signing => &self.signing,
        }
    }

    fn slot_mut(&mut self, certificate_type: CertificateType) -> &mut KeySlot {
        match certificate_type {
            CertificateType::Authentication => &mut self.auth,
            CertificateType::Signing => &mut self.signing,
        }
    }

    /// Common prologue of every card operation: simulated latency and
    /// injected failures.
    fn begin_operation(&self, operation: &str) -> CardResult<()> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        if let Some(error) = self.state.lock().fail_next.take() {
            debug!(operation, %error, "Injected mock card failure");
            return Err(error);
        }

        trace!(operation, card = %self.name, "Mock card operation");
        Ok(())
    }

    fn verify_pin(&self, certificate_type: CertificateType, pin: Option<&Pin>) -> CardResult<()> {
        let slot = self.slot(certificate_type);
        let entered = match (pin, &self.pin_pad_input) {
            (Some(pin), _) => pin.clone(),
            (None, PinPadInput::CorrectPin) => slot.pin.clone(),
            (None, PinPadInput::Pin(pin)) => pin.clone(),
            (None, PinPadInput::Cancel) => return Err(CardError::PinPadCancelled),
        };

        let mut state = self.state.lock();
        let retries_left = match certificate_type {
            CertificateType::Authentication => &mut state.auth_retries_left,
            CertificateType::Signing => &mut state.signing_retries_left,
        };

        if *retries_left == 0 {
            return Err(CardError::PinBlocked);
        }

        if entered != slot.pin {
            *retries_left -= 1;
            if *retries_left == 0 {
                return Err(CardError::PinBlocked);
            }
            return Err(CardError::VerifyPinFailed {
                retries_left: *retries_left,
            });
        }

        *retries_left = self.max_pin_retries;
        Ok(())
    }

    fn require_certificate(&self, certificate_type: CertificateType) -> CardResult<()> {
        if self.slot(certificate_type).certificate.is_none() {
            return Err(CardError::CertificateNotFound { certificate_type });
        }
        Ok(())
    }

    /// Deterministic 96 byte P-384 sized pseudo-signature.
    fn pseudo_signature(&self, key_label: &[u8], hash: &[u8]) -> Vec<u8> {
        let mut signature = Vec::with_capacity(96);
        for half in [b"r".as_slice(), b"s".as_slice()] {
            let mut hasher = Sha384::new();
            hasher.update(key_label);
            hasher.update(half);
            hasher.update(hash);
            signature.extend_from_slice(&hasher.finalize());
        }

        self.state.lock().signature_count += 1;
        signature
    }
}

impl Default for MockCard {
    fn default() -> Self {
        Self::esteid()
    }
}

impl SmartCard for MockCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CardCapabilities {
        self.state.lock().capability_queries += 1;
        CardCapabilities {
            authentication: self.auth.certificate.is_some(),
            signing: self.signing.certificate.is_some(),
        }
    }

    fn read_certificate(&self, certificate_type: CertificateType) -> CardResult<Vec<u8>> {
        self.begin_operation("read_certificate")?;
        self.slot(certificate_type)
            .certificate
            .clone()
            .ok_or(CardError::CertificateNotFound { certificate_type })
    }

    fn pin_info(&self, certificate_type: CertificateType) -> CardResult<PinInfo> {
        self.begin_operation("pin_info")?;
        let slot = self.slot(certificate_type);
        Ok(PinInfo {
            min_length: slot.min_pin_length,
            max_length: slot.max_pin_length,
            retries_left: self.retries_left(certificate_type),
            max_retries: self.max_pin_retries,
            reader_has_pin_pad: false,
        })
    }

    fn auth_signature_algorithm(&self) -> JsonWebSignatureAlgorithm {
        self.auth_algorithm
    }

    fn supported_signature_algorithms(&self) -> Vec<SignatureAlgorithm> {
        HashAlgorithm::ALL
            .into_iter()
            .map(SignatureAlgorithm::ecc)
            .collect()
    }

    fn sign_with_auth_key(&self, pin: Option<&Pin>, hash: &[u8]) -> CardResult<Vec<u8>> {
        self.begin_operation("sign_with_auth_key")?;
        self.require_certificate(CertificateType::Authentication)?;

        let expected_len = self.auth_algorithm.hash_algorithm().digest_len();
        if hash.len() != expected_len {
            return Err(CardError::command(format!(
                "authentication hash must be {} bytes, got {}",
                expected_len,
                hash.len()
            )));
        }

        self.verify_pin(CertificateType::Authentication, pin)?;
        Ok(self.pseudo_signature(b"auth", hash))
    }

    fn sign_with_signing_key(
        &self,
        pin: Option<&Pin>,
        hash: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> CardResult<(Vec<u8>, SignatureAlgorithm)> {
        self.begin_operation("sign_with_signing_key")?;
        self.require_certificate(CertificateType::Signing)?;

        if hash.len() != hash_algorithm.digest_len() {
            return Err(CardError::command(format!(
                "{} hash must be {} bytes, got {}",
                hash_algorithm,
                hash_algorithm.digest_len(),
                hash.len()
            )));
        }

        self.verify_pin(CertificateType::Signing, pin)?;
        Ok((
            self.pseudo_signature(b"sign", hash),
            SignatureAlgorithm::ecc(hash_algorithm),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_esteid_capabilities() {
        let card = MockCard::esteid();
        assert_eq!(card.name(), "Mock EstEID");
        assert_eq!(card.capabilities(), CardCapabilities::all());

        let signing_only = MockCard::signing_only();
        assert!(!signing_only.capabilities().authentication);
        assert!(signing_only.capabilities().signing);
    }

    #[test]
    fn test_read_certificate() {
        let card = MockCard::esteid();
        assert_eq!(
            card.read_certificate(CertificateType::Authentication).unwrap(),
            AUTH_CERTIFICATE
        );
        assert_eq!(
            MockCard::authentication_only().read_certificate(CertificateType::Signing),
            Err(CardError::CertificateNotFound {
                certificate_type: CertificateType::Signing
            })
        );
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let card = MockCard::esteid();
        card.fail_next(CardError::card_removed("Reader 0"));

        assert_eq!(
            card.pin_info(CertificateType::Authentication),
            Err(CardError::card_removed("Reader 0"))
        );
        assert!(card.pin_info(CertificateType::Authentication).is_ok());
    }

    #[test]
    fn test_wrong_pin_counts_down_to_blocked() {
        let card = MockCard::esteid();
        let wrong = Pin::new("0000");
        let hash = [0u8; 48];

        assert_eq!(
            card.sign_with_auth_key(Some(&wrong), &hash),
            Err(CardError::VerifyPinFailed { retries_left: 2 })
        );
        assert_eq!(
            card.sign_with_auth_key(Some(&wrong), &hash),
            Err(CardError::VerifyPinFailed { retries_left: 1 })
        );
        assert_eq!(
            card.sign_with_auth_key(Some(&wrong), &hash),
            Err(CardError::PinBlocked)
        );
        assert_eq!(
            card.sign_with_auth_key(Some(&Pin::new("1234")), &hash),
            Err(CardError::PinBlocked)
        );
        assert_eq!(card.retries_left(CertificateType::Authentication), 0);
    }

    #[test]
    fn test_correct_pin_resets_counter() {
        let card = MockCard::esteid();
        let hash = [0u8; 48];

        let _ = card.sign_with_auth_key(Some(&Pin::new("0000")), &hash);
        assert_eq!(card.retries_left(CertificateType::Authentication), 2);

        card.sign_with_auth_key(Some(&Pin::new("1234")), &hash).unwrap();
        assert_eq!(card.retries_left(CertificateType::Authentication), 3);
        assert_eq!(card.signature_count(), 1);
    }

    #[rstest]
    #[case(PinPadInput::CorrectPin, Ok(()))]
    #[case(PinPadInput::Cancel, Err(CardError::PinPadCancelled))]
    #[case(PinPadInput::Pin(Pin::new("99999")), Err(CardError::VerifyPinFailed { retries_left: 2 }))]
    fn test_pin_pad_input(#[case] input: PinPadInput, #[case] expected: CardResult<()>) {
        let card = MockCard::esteid().with_pin_pad_input(input);
        let result = card
            .sign_with_signing_key(None, &[1u8; 32], HashAlgorithm::Sha256)
            .map(|_| ());
        assert_eq!(result, expected);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let card = MockCard::esteid();
        let pin = Pin::new("12345");
        let (first, algorithm) = card
            .sign_with_signing_key(Some(&pin), &[7u8; 64], HashAlgorithm::Sha512)
            .unwrap();
        let (second, _) = card
            .sign_with_signing_key(Some(&pin), &[7u8; 64], HashAlgorithm::Sha512)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 96);
        assert_eq!(algorithm, SignatureAlgorithm::ecc(HashAlgorithm::Sha512));
    }

    #[test]
    fn test_hash_length_mismatch() {
        let card = MockCard::esteid();
        let result = card.sign_with_signing_key(
            Some(&Pin::new("12345")),
            &[0u8; 20],
            HashAlgorithm::Sha256,
        );
        assert!(matches!(result, Err(CardError::CommandFailed { .. })));
    }
}
