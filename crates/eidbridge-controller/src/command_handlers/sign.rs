//! Document signing handler.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use eidbridge_card::{CardInfo, CertificateType, HashAlgorithm, Pin};
use eidbridge_core::constants::{ARG_CERTIFICATE, ARG_HASH, ARG_HASH_FUNCTION};
use eidbridge_core::{Command, CommandType, Error, RetriableError};

use super::{
    CertificateReader, CertificateReady, CommandHandler, HandlerError, HandlerFailure,
    HandlerSignals, insert_result,
};
use crate::result::ResultMap;

fn string_argument<'a>(command: &'a Command, name: &str) -> Result<&'a str, Error> {
    command
        .arguments()
        .get(name)
        .ok_or_else(|| Error::MissingArgument(name.to_string()))?
        .as_str()
        .ok_or_else(|| Error::invalid_argument(name, "must be a string"))
}

fn base64_argument(command: &Command, name: &str) -> Result<Vec<u8>, Error> {
    let decoded = STANDARD
        .decode(string_argument(command, name)?)
        .map_err(|e| Error::invalid_argument(name, format!("is not valid base64: {}", e)))?;
    if decoded.is_empty() {
        return Err(Error::invalid_argument(name, "must not be empty"));
    }
    Ok(decoded)
}

/// Signs a document hash with the card's signing key.
#[derive(Debug)]
pub struct Signer {
    reader: CertificateReader,
    hash: Vec<u8>,
    hash_algorithm: HashAlgorithm,
    certificate: Vec<u8>,
}

impl Signer {
    /// # Errors
    ///
    /// Returns `HandlerError::Argument` for a missing or invalid origin,
    /// hash, hash function or certificate, and when the hash length does not
    /// match the hash function.
    pub fn new(command: Arc<Command>) -> Result<Self, HandlerError> {
        let hash_function = string_argument(&command, ARG_HASH_FUNCTION)?;
        let hash_algorithm = HashAlgorithm::from_name(hash_function).ok_or_else(|| {
            Error::invalid_argument(
                ARG_HASH_FUNCTION,
                format!("unsupported hash function '{}'", hash_function),
            )
        })?;

        let hash = base64_argument(&command, ARG_HASH)?;
        if hash.len() != hash_algorithm.digest_len() {
            return Err(Error::invalid_argument(
                ARG_HASH,
                format!(
                    "length {} does not match {} ({} bytes)",
                    hash.len(),
                    hash_algorithm,
                    hash_algorithm.digest_len()
                ),
            )
            .into());
        }

        let certificate = base64_argument(&command, ARG_CERTIFICATE)?;
        let reader = CertificateReader::new(command, CertificateType::Signing)?;

        Ok(Self {
            reader,
            hash,
            hash_algorithm,
            certificate,
        })
    }
}

impl CommandHandler for Signer {
    fn command_type(&self) -> CommandType {
        CommandType::Sign
    }

    fn certificate_type(&self) -> CertificateType {
        CertificateType::Signing
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
        let ready = self.reader.read_certificate(card, cancel)?;
        if self.reader.certificate_der() != self.certificate.as_slice() {
            return Err(HandlerFailure::retriable(
                RetriableError::NoValidCertificateAvailable,
                format!("Signing certificate on {} does not match the requested one", card),
            ));
        }
        Ok(ready)
    }

    fn on_confirm(
        &mut self,
        card: &CardInfo,
        pin: Option<&Pin>,
        cancel: &CancellationToken,
    ) -> Result<ResultMap, HandlerFailure> {
        HandlerFailure::check_cancelled(cancel)?;
        HandlerFailure::check_removed(card)?;

        let (signature, algorithm) =
            card.card()
                .sign_with_signing_key(pin, &self.hash, self.hash_algorithm)?;
        info!("Signed {} hash with {}", self.hash_algorithm, card);

        let algorithm: Value =
            serde_json::to_value(algorithm).map_err(|e| HandlerFailure::critical(e.to_string()))?;

        let mut result = ResultMap::new();
        insert_result(&mut result, "signature", STANDARD.encode(signature))?;
        insert_result(&mut result, "signatureAlgorithm", algorithm)?;
        Ok(result)
    }
}
