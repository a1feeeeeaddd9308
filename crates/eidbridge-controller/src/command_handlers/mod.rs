//! Command handlers.
//!
//! A [`CommandHandler`] implements one command against one card. The
//! controller builds the handler once from the command with
//! [`create_command_handler`], which validates the arguments, and then drives
//! it in two blocking steps on child threads:
//!
//! 1. [`CommandHandler::run`] reads and checks the certificate, producing a
//!    [`CertificateReady`] that is shown to the user;
//! 2. [`CommandHandler::on_confirm`] runs after the user confirms (with a
//!    PIN, if one is needed) and produces the partial [`ResultMap`].
//!
//! Failures are classified where they are detected and returned as
//! [`HandlerFailure`]; the controller only looks at that classification.

mod authenticate;
mod certificate_reader;
mod sign;
mod signals;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use eidbridge_card::{CardError, CardErrorClass, CardInfo, CertificateType, Pin, PinInfo};
use eidbridge_core::{Command, CommandType, RetriableError};

use crate::result::ResultMap;
use crate::ui::{UiResponder, WebEidUi};

pub use authenticate::Authenticator;
pub use certificate_reader::{CertificateReader, validate_origin};
pub use sign::Signer;
pub use signals::HandlerSignals;

/// Errors raised while building or wiring a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A command argument is missing or malformed.
    #[error(transparent)]
    Argument(#[from] eidbridge_core::Error),

    /// `connect_signals` was called a second time.
    #[error("Command handler signals are already connected")]
    SignalsAlreadyConnected,
}

/// Classified failure of a handler step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerFailure {
    /// Transient condition; the user may retry.
    #[error("{error}: {message}")]
    Retriable {
        error: RetriableError,
        message: String,
    },

    /// Wrong PIN, attempts remain.
    #[error("PIN verification failed, {retries_left} retries left")]
    PinRetryAllowed { retries_left: u8 },

    /// The user cancelled on the PIN-pad.
    #[error("Cancelled by user")]
    UserCancelled,

    /// The step noticed its cancellation token and stopped.
    #[error("Operation aborted")]
    Aborted,

    /// Unrecoverable.
    #[error("{0}")]
    Critical(String),
}

impl HandlerFailure {
    pub fn retriable(error: RetriableError, message: impl Into<String>) -> Self {
        Self::Retriable {
            error,
            message: message.into(),
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::Critical(message.into())
    }

    /// Fail with `Aborted` if the token has been cancelled.
    pub fn check_cancelled(cancel: &CancellationToken) -> Result<(), HandlerFailure> {
        if cancel.is_cancelled() {
            return Err(Self::Aborted);
        }
        Ok(())
    }

    /// Fail with `SmartCardWasRemoved` if the card is gone.
    pub fn check_removed(card: &CardInfo) -> Result<(), HandlerFailure> {
        if card.is_removed() {
            return Err(Self::retriable(
                RetriableError::SmartCardWasRemoved,
                format!("Card removed from {}", card.reader().name),
            ));
        }
        Ok(())
    }
}

impl From<CardError> for HandlerFailure {
    fn from(error: CardError) -> Self {
        match error.classify() {
            CardErrorClass::Retriable(retriable) => Self::retriable(retriable, error.to_string()),
            CardErrorClass::PinRetry { retries_left } => Self::PinRetryAllowed { retries_left },
            CardErrorClass::UserCancelled => Self::UserCancelled,
            CardErrorClass::Critical => Self::Critical(error.to_string()),
        }
    }
}

/// Validity of a certificate at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Valid,
    NotYetActive,
    Expired,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::NotYetActive => write!(f, "not yet active"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Certificate details shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub certificate_type: CertificateType,
    pub subject: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Artifact of a successful [`CommandHandler::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateReady {
    /// Validated origin of the requesting page.
    pub origin: Url,
    pub status: CertificateStatus,
    pub certificate_info: CertificateInfo,
    pub pin_info: PinInfo,
}

/// One command's business logic against a selected card.
///
/// `run` and `on_confirm` block on card I/O and are only called from child
/// threads. The handler is moved into the child thread and handed back with
/// the step's result.
pub trait CommandHandler: Send {
    fn command_type(&self) -> CommandType;

    /// Certificate type a card must hold to be eligible.
    fn certificate_type(&self) -> CertificateType;

    fn signals(&self) -> &HandlerSignals;

    /// Wire the handler's signals to the UI. At most once per handler.
    fn connect_signals(
        &self,
        ui: Arc<dyn WebEidUi>,
        responder: UiResponder,
    ) -> Result<(), HandlerError> {
        self.signals().connect(ui, responder)
    }

    /// Whether confirmation needs a PIN.
    fn needs_pin(&self) -> bool;

    /// Read and check the certificate. Invoked once per handler.
    fn run(
        &mut self,
        card: &CardInfo,
        cancel: &CancellationToken,
    ) -> Result<CertificateReady, HandlerFailure>;

    /// Complete the command after user confirmation.
    ///
    /// `pin` is `None` when the PIN is entered on the reader's PIN-pad.
    fn on_confirm(
        &mut self,
        card: &CardInfo,
        pin: Option<&Pin>,
        cancel: &CancellationToken,
    ) -> Result<ResultMap, HandlerFailure>;
}

/// Build the handler for a command, validating its arguments.
///
/// # Errors
///
/// Returns `HandlerError::Argument` if an argument is missing or malformed.
pub fn create_command_handler(command: Arc<Command>) -> Result<Box<dyn CommandHandler>, HandlerError> {
    let handler: Box<dyn CommandHandler> = match command.command_type() {
        CommandType::GetSigningCertificate => {
            Box::new(CertificateReader::new(command, CertificateType::Signing)?)
        }
        CommandType::Authenticate => Box::new(Authenticator::new(command)?),
        CommandType::Sign => Box::new(Signer::new(command)?),
    };
    Ok(handler)
}

/// Insert into a partial result built by a handler.
///
/// Keys of one handler step never collide, so a collision is a bug.
pub(crate) fn insert_result(
    result: &mut ResultMap,
    key: &str,
    value: impl Into<serde_json::Value>,
) -> Result<(), HandlerFailure> {
    result
        .insert(key, value)
        .map_err(|e| HandlerFailure::critical(e.to_string()))
}
