//! Authentication handler.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tokio_util::sync::CancellationToken;
use tracing::info;

use eidbridge_card::{CardInfo, CertificateType, HashAlgorithm, Pin};
use eidbridge_core::constants::{
    ARG_CHALLENGE_NONCE, AUTH_TOKEN_FORMAT, MAX_CHALLENGE_NONCE_LENGTH, MIN_CHALLENGE_NONCE_LENGTH,
};
use eidbridge_core::{Command, CommandType, Error, VERSION};

use super::{
    CertificateReader, CertificateReady, CommandHandler, HandlerError, HandlerFailure,
    HandlerSignals, insert_result,
};
use crate::result::ResultMap;

fn validate_challenge_nonce(value: Option<&Value>) -> Result<String, Error> {
    let nonce = value
        .ok_or_else(|| Error::MissingArgument(ARG_CHALLENGE_NONCE.to_string()))?
        .as_str()
        .ok_or_else(|| Error::invalid_argument(ARG_CHALLENGE_NONCE, "must be a string"))?;

    let length = nonce.chars().count();
    if !(MIN_CHALLENGE_NONCE_LENGTH..=MAX_CHALLENGE_NONCE_LENGTH).contains(&length) {
        return Err(Error::invalid_argument(
            ARG_CHALLENGE_NONCE,
            format!(
                "must be {} to {} characters, got {}",
                MIN_CHALLENGE_NONCE_LENGTH, MAX_CHALLENGE_NONCE_LENGTH, length
            ),
        ));
    }
    Ok(nonce.to_string())
}

pub(crate) fn sha2_digest(algorithm: HashAlgorithm, data: &[u8]) -> Option<Vec<u8>> {
    let digest = match algorithm {
        HashAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(digest)
}

/// Value signed for authentication: `H(H(origin) || H(challenge_nonce))`.
pub(crate) fn authentication_hash(
    algorithm: HashAlgorithm,
    origin: &str,
    challenge_nonce: &str,
) -> Option<Vec<u8>> {
    let mut data = sha2_digest(algorithm, origin.as_bytes())?;
    data.extend(sha2_digest(algorithm, challenge_nonce.as_bytes())?);
    sha2_digest(algorithm, &data)
}

/// Creates a `web-eid:1.0` authentication token for the requesting origin.
#[derive(Debug)]
pub struct Authenticator {
    reader: CertificateReader,
    challenge_nonce: String,
}

impl Authenticator {
    /// # Errors
    ///
    /// Returns `HandlerError::Argument` if the origin or the challenge nonce
    /// is missing or invalid.
    pub fn new(command: Arc<Command>) -> Result<Self, HandlerError> {
        let challenge_nonce = validate_challenge_nonce(command.arguments().get(ARG_CHALLENGE_NONCE))?;
        let reader = CertificateReader::new(command, CertificateType::Authentication)?;
        Ok(Self {
            reader,
            challenge_nonce,
        })
    }
}

impl CommandHandler for Authenticator {
    fn command_type(&self) -> CommandType {
        CommandType::Authenticate
    }

    fn certificate_type(&self) -> CertificateType {
        CertificateType::Authentication
    }

    fn signals(&self) -> &HandlerSignals {
        self.reader.signals()
    }

    fn needs_pin(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        card: &CardInfo,
        cancel: &CancellationToken,
    ) -> Result<CertificateReady, HandlerFailure> {
        self.reader.read_certificate(card, cancel)
    }

    fn on_confirm(
        &mut self,
        card: &CardInfo,
        pin: Option<&Pin>,
        cancel: &CancellationToken,
    ) -> Result<ResultMap, HandlerFailure> {
        HandlerFailure::check_cancelled(cancel)?;
        HandlerFailure::check_removed(card)?;

        let algorithm = card.card().auth_signature_algorithm();
        let hash = authentication_hash(
            algorithm.hash_algorithm(),
            &self.reader.origin_string(),
            &self.challenge_nonce,
        )
        .ok_or_else(|| {
            HandlerFailure::critical(format!("Unsupported authentication algorithm {}", algorithm))
        })?;

        let signature = card.card().sign_with_auth_key(pin, &hash)?;
        info!("Created {} authentication token for {}", algorithm, self.reader.origin_string());

        let mut result = ResultMap::new();
        insert_result(&mut result, "unverifiedCertificate", self.reader.certificate_base64()?)?;
        insert_result(&mut result, "algorithm", algorithm.name())?;
        insert_result(&mut result, "signature", STANDARD.encode(signature))?;
        insert_result(&mut result, "format", AUTH_TOKEN_FORMAT)?;
        insert_result(&mut result, "appVersion", format!("eidbridge/{}", VERSION))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidbridge_card::mock::{AUTH_CERTIFICATE, MockCard};
    use eidbridge_card::{CardError, ReaderInfo};
    use eidbridge_core::RetriableError;
    use rstest::rstest;
    use serde_json::json;

    const NONCE: &str = "12345678123456781234567812345678912356789123";

    fn authenticator(nonce: Value) -> Result<Authenticator, HandlerError> {
        let command = Command::from_json(
            &json!({
                "command": "authenticate",
                "arguments": {"origin": "https://ria.ee", "challengeNonce": nonce}
            })
            .to_string(),
        )
        .unwrap();
        Authenticator::new(Arc::new(command))
    }

    fn card() -> Arc<CardInfo> {
        CardInfo::new(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()))
    }

    #[rstest]
    #[case(json!("a".repeat(43)))]
    #[case(json!("a".repeat(129)))]
    #[case(json!(12345))]
    fn test_invalid_nonce(#[case] nonce: Value) {
        assert!(matches!(authenticator(nonce), Err(HandlerError::Argument(_))));
    }

    #[rstest]
    #[case(44)]
    #[case(128)]
    fn test_nonce_length_bounds(#[case] length: usize) {
        assert!(authenticator(json!("a".repeat(length))).is_ok());
    }

    #[test]
    fn test_authentication_hash() {
        let expected = {
            let mut data = Sha384::digest(b"https://ria.ee").to_vec();
            data.extend(Sha384::digest(NONCE.as_bytes()));
            Sha384::digest(&data).to_vec()
        };

        let hash = authentication_hash(HashAlgorithm::Sha384, "https://ria.ee", NONCE).unwrap();

        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 48);
        assert!(authentication_hash(HashAlgorithm::Sha3_256, "https://ria.ee", NONCE).is_none());
    }

    #[test]
    fn test_authenticate() {
        let mut handler = authenticator(json!(NONCE)).unwrap();
        let card = card();
        let cancel = CancellationToken::new();

        handler.run(&card, &cancel).unwrap();
        let result = handler
            .on_confirm(&card, Some(&Pin::new("1234")), &cancel)
            .unwrap();

        assert_eq!(result.get("unverifiedCertificate"), Some(&json!(STANDARD.encode(AUTH_CERTIFICATE))));
        assert_eq!(result.get("algorithm"), Some(&json!("ES384")));
        assert_eq!(result.get("format"), Some(&json!("web-eid:1.0")));
        let signature = STANDARD
            .decode(result.get("signature").unwrap().as_str().unwrap())
            .unwrap();
        assert_eq!(signature.len(), 96);
    }

    #[test]
    fn test_wrong_pin() {
        let mut handler = authenticator(json!(NONCE)).unwrap();
        let card = card();
        let cancel = CancellationToken::new();
        handler.run(&card, &cancel).unwrap();

        assert_eq!(
            handler.on_confirm(&card, Some(&Pin::new("0000")), &cancel),
            Err(HandlerFailure::PinRetryAllowed { retries_left: 2 })
        );
    }

    #[test]
    fn test_signing_only_card_has_no_auth_certificate() {
        let mut handler = authenticator(json!(NONCE)).unwrap();
        let card = CardInfo::new(ReaderInfo::new("Reader 0"), Arc::new(MockCard::signing_only()));

        assert_eq!(
            handler.run(&card, &CancellationToken::new()),
            Err(HandlerFailure::from(CardError::CertificateNotFound {
                certificate_type: CertificateType::Authentication
            }))
        );
        assert!(matches!(
            HandlerFailure::from(CardError::CertificateNotFound {
                certificate_type: CertificateType::Authentication
            }),
            HandlerFailure::Retriable {
                error: RetriableError::NoValidCertificateAvailable,
                ..
            }
        ));
    }
}
