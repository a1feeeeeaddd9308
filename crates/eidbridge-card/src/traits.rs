//! Card trait definitions.
//!
//! [`SmartCard`] is the invocation boundary of the card transport: every
//! method performs blocking I/O and must only be called from a worker thread,
//! never from the controller context.
//!
//! Unlike device traits built on `async fn`, this trait is synchronous so it
//! stays object safe and can be shared as `Arc<dyn SmartCard>`.

use std::fmt::Debug;

use crate::error::CardResult;
use crate::types::{
    CardCapabilities, CertificateType, HashAlgorithm, JsonWebSignatureAlgorithm, Pin, PinInfo,
    SignatureAlgorithm,
};

/// A smart card inserted in a reader.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the monitor backend reads the name
/// and capabilities when it wraps the card in a `CardInfo`, and worker
/// threads perform the I/O.
///
/// # PIN entry
///
/// Operations taking `Option<&Pin>` read the PIN from the reader's PIN-pad
/// when `None` is passed.
pub trait SmartCard: Send + Sync + Debug {
    /// Card type name, e.g. "EstEID IDEMIA v1".
    fn name(&self) -> &str;

    /// Certificate slots present on the card.
    fn capabilities(&self) -> CardCapabilities;

    /// Read the DER encoded certificate of the given type.
    ///
    /// # Errors
    ///
    /// Returns `CardError::CertificateNotFound` if the slot is empty, or a
    /// transport error.
    fn read_certificate(&self, certificate_type: CertificateType) -> CardResult<Vec<u8>>;

    /// Read PIN length limits and the retry counter for the key of the given type.
    fn pin_info(&self, certificate_type: CertificateType) -> CardResult<PinInfo>;

    /// JWS algorithm of the authentication key.
    fn auth_signature_algorithm(&self) -> JsonWebSignatureAlgorithm;

    /// Signature algorithms supported by the signing key.
    fn supported_signature_algorithms(&self) -> Vec<SignatureAlgorithm>;

    /// Verify the authentication PIN and sign `hash` with the authentication key.
    ///
    /// # Errors
    ///
    /// Returns `CardError::VerifyPinFailed` for a wrong PIN with retries left,
    /// `CardError::PinBlocked` when no retries remain.
    fn sign_with_auth_key(&self, pin: Option<&Pin>, hash: &[u8]) -> CardResult<Vec<u8>>;

    /// Verify the signing PIN and sign `hash` with the signing key.
    ///
    /// Returns the signature and the algorithm that produced it.
    fn sign_with_signing_key(
        &self,
        pin: Option<&Pin>,
        hash: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> CardResult<(Vec<u8>, SignatureAlgorithm)>;
}
