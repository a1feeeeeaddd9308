//! Certificate reading handler.
//!
//! [`CertificateReader`] validates the requesting origin when it is built
//! and, when run, reads the card's certificate of the required type, checks
//! that its key usage matches, and reports its validity together with the
//! PIN metadata. The authentication and signing handlers build on it.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use x509_certificate::X509Certificate;

use eidbridge_card::{CardInfo, CertificateType, Pin};
use eidbridge_core::constants::{ALLOWED_ORIGIN_SCHEMES, ARG_ORIGIN, MAX_ORIGIN_LENGTH};
use eidbridge_core::{Command, CommandType, Error, RetriableError};

use super::{
    CertificateInfo, CertificateReady, CertificateStatus, CommandHandler, HandlerError,
    HandlerFailure, HandlerSignals, insert_result,
};
use crate::result::ResultMap;

/// id-ce-keyUsage (2.5.29.15)
const OID_KEY_USAGE: &[u8] = &[0x55, 0x1d, 0x0f];

const KEY_USAGE_DIGITAL_SIGNATURE: u8 = 0x80;
const KEY_USAGE_NON_REPUDIATION: u8 = 0x40;

/// Validate the `origin` argument.
///
/// Accepts `https` and `wss` origins of the form `scheme://host[:port]`.
///
/// # Errors
///
/// Returns `Error::MissingArgument` when absent and `Error::InvalidArgument`
/// for anything that is not a plain origin.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use eidbridge_controller::command_handlers::validate_origin;
///
/// assert!(validate_origin(Some(&json!("https://ria.ee"))).is_ok());
/// assert!(validate_origin(Some(&json!("http://ria.ee"))).is_err());
/// assert!(validate_origin(None).is_err());
/// ```
pub fn validate_origin(value: Option<&Value>) -> Result<Url, Error> {
    let origin = value
        .ok_or_else(|| Error::MissingArgument(ARG_ORIGIN.to_string()))?
        .as_str()
        .ok_or_else(|| Error::invalid_argument(ARG_ORIGIN, "must be a string"))?;

    if origin.chars().count() > MAX_ORIGIN_LENGTH {
        return Err(Error::invalid_argument(
            ARG_ORIGIN,
            format!("must be at most {} characters", MAX_ORIGIN_LENGTH),
        ));
    }

    let url = Url::parse(origin)
        .map_err(|e| Error::invalid_argument(ARG_ORIGIN, format!("is not a valid URL: {}", e)))?;

    if !ALLOWED_ORIGIN_SCHEMES.contains(&url.scheme()) {
        return Err(Error::invalid_argument(
            ARG_ORIGIN,
            format!("scheme '{}' is not allowed", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_argument(ARG_ORIGIN, "must contain a host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(Error::invalid_argument(ARG_ORIGIN, "must not contain credentials"));
    }
    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(Error::invalid_argument(
            ARG_ORIGIN,
            "must not contain a path, query or fragment",
        ));
    }

    Ok(url)
}

/// Classify a certificate by its KeyUsage extension.
///
/// nonRepudiation marks a signing certificate; digitalSignature without it
/// an authentication certificate.
pub(crate) fn classify_certificate(certificate: &X509Certificate) -> Option<CertificateType> {
    let extension = certificate
        .iter_extensions()
        .find(|extension| extension.id.as_ref() == OID_KEY_USAGE)?;

    // BIT STRING: tag, length, unused bits, first content byte
    let value = extension.value.to_bytes();
    if value.len() < 4 || value[0] != 0x03 {
        return None;
    }
    let bits = value[3];

    if bits & KEY_USAGE_NON_REPUDIATION != 0 {
        Some(CertificateType::Signing)
    } else if bits & KEY_USAGE_DIGITAL_SIGNATURE != 0 {
        Some(CertificateType::Authentication)
    } else {
        None
    }
}

pub(crate) fn certificate_status(
    certificate: &X509Certificate,
    now: DateTime<Utc>,
) -> CertificateStatus {
    if now < certificate.validity_not_before() {
        CertificateStatus::NotYetActive
    } else if now > certificate.validity_not_after() {
        CertificateStatus::Expired
    } else {
        CertificateStatus::Valid
    }
}

/// Reads and checks one certificate from the selected card.
///
/// Serves `get-signing-certificate` directly.
#[derive(Debug)]
pub struct CertificateReader {
    command: Arc<Command>,
    certificate_type: CertificateType,
    origin: Url,
    certificate_der: Vec<u8>,
    certificate: Option<X509Certificate>,
    signals: HandlerSignals,
    has_run: bool,
}

impl CertificateReader {
    /// Create a reader for certificates of `certificate_type`.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Argument` if the origin is missing or invalid.
    pub fn new(command: Arc<Command>, certificate_type: CertificateType) -> Result<Self, HandlerError> {
        let origin = Self::validate_and_store_origin(&command)?;
        Ok(Self {
            command,
            certificate_type,
            origin,
            certificate_der: Vec::new(),
            certificate: None,
            signals: HandlerSignals::new(),
            has_run: false,
        })
    }

    fn validate_and_store_origin(command: &Command) -> Result<Url, HandlerError> {
        let origin = validate_origin(command.arguments().get(ARG_ORIGIN))?;
        debug!("Accepted origin {}", origin);
        Ok(origin)
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Origin as `scheme://host[:port]`, without a trailing slash.
    pub fn origin_string(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// DER bytes of the certificate read by `run`; empty before that.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn certificate(&self) -> Option<&X509Certificate> {
        self.certificate.as_ref()
    }

    /// Base64 of the certificate read by `run`.
    pub fn certificate_base64(&self) -> Result<String, HandlerFailure> {
        if self.certificate_der.is_empty() {
            return Err(HandlerFailure::critical(
                "Certificate requested before it was read",
            ));
        }
        Ok(STANDARD.encode(&self.certificate_der))
    }

    /// The `run` step shared with the handlers that build on the reader.
    pub fn read_certificate(
        &mut self,
        card: &CardInfo,
        cancel: &CancellationToken,
    ) -> Result<CertificateReady, HandlerFailure> {
        if self.has_run {
            return Err(HandlerFailure::critical(
                "Command handler run was invoked more than once",
            ));
        }
        self.has_run = true;

        HandlerFailure::check_cancelled(cancel)?;
        HandlerFailure::check_removed(card)?;

        let der = card.card().read_certificate(self.certificate_type)?;
        HandlerFailure::check_cancelled(cancel)?;

        let certificate = X509Certificate::from_der(&der).map_err(|e| {
            HandlerFailure::retriable(
                RetriableError::NoValidCertificateAvailable,
                format!("Failed to parse {} certificate: {}", self.certificate_type, e),
            )
        })?;

        match classify_certificate(&certificate) {
            Some(found) if found == self.certificate_type => {}
            found => {
                return Err(HandlerFailure::retriable(
                    RetriableError::NoValidCertificateAvailable,
                    format!(
                        "Expected a {} certificate, card returned {}",
                        self.certificate_type,
                        found.map_or("an unclassifiable one".to_string(), |t| format!("a {} one", t))
                    ),
                ));
            }
        }

        let status = certificate_status(&certificate, Utc::now());
        let mut pin_info = card.card().pin_info(self.certificate_type)?;
        pin_info.reader_has_pin_pad |= card.reader().has_pin_pad;

        let certificate_info = CertificateInfo {
            certificate_type: self.certificate_type,
            subject: certificate.subject_common_name().unwrap_or_default(),
            issuer: certificate.issuer_common_name().unwrap_or_default(),
            valid_from: certificate.validity_not_before(),
            valid_until: certificate.validity_not_after(),
        };

        info!(
            "Read {} certificate of '{}' from {}, status {}",
            self.certificate_type, certificate_info.subject, card, status
        );

        self.certificate_der = der;
        self.certificate = Some(certificate);

        Ok(CertificateReady {
            origin: self.origin.clone(),
            status,
            certificate_info,
            pin_info,
        })
    }
}

impl CommandHandler for CertificateReader {
    fn command_type(&self) -> CommandType {
        self.command.command_type()
    }

    fn certificate_type(&self) -> CertificateType {
        self.certificate_type
    }

    fn signals(&self) -> &HandlerSignals {
        &self.signals
    }

    fn needs_pin(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        card: &CardInfo,
        cancel: &CancellationToken,
    ) -> Result<CertificateReady, HandlerFailure> {
        self.read_certificate(card, cancel)
    }

    fn on_confirm(
        &mut self,
        card: &CardInfo,
        _pin: Option<&Pin>,
        cancel: &CancellationToken,
    ) -> Result<ResultMap, HandlerFailure> {
        HandlerFailure::check_cancelled(cancel)?;
        HandlerFailure::check_removed(card)?;

        let algorithms = serde_json::to_value(card.card().supported_signature_algorithms())
            .map_err(|e| HandlerFailure::critical(e.to_string()))?;

        let mut result = ResultMap::new();
        insert_result(&mut result, "certificate", self.certificate_base64()?)?;
        insert_result(&mut result, "supportedSignatureAlgorithms", algorithms)?;
        Ok(result)
    }
}
