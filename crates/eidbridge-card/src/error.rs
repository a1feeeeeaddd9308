//! Error types for card and reader operations.
//!
//! Card backends report failures with [`CardError`]. The controller never
//! inspects backend details; it only looks at the [`CardErrorClass`] returned
//! by [`CardError::classify`].

use eidbridge_core::RetriableError;

use crate::types::CertificateType;

/// Result type alias for card operations.
pub type CardResult<T> = std::result::Result<T, CardError>;

/// Errors that can occur during card and reader operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    /// The smart card service (PC/SC daemon) is not available.
    #[error("Smart card service is not running")]
    ServiceNotRunning,

    /// No readers are connected.
    #[error("No smart card readers found")]
    NoReaders,

    /// The card was removed from the reader.
    #[error("Card removed from reader: {reader}")]
    CardRemoved { reader: String },

    /// Reader or card communication error.
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// The card transaction could not be started or was interrupted.
    #[error("Transaction failed: {message}")]
    TransactionFailed { message: String },

    /// The card rejected a command.
    #[error("Card command failed: {message}")]
    CommandFailed { message: String },

    /// The reader did not respond in time.
    #[error("Reader timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// PIN verification failed, more attempts are allowed.
    #[error("PIN verification failed, {retries_left} retries left")]
    VerifyPinFailed { retries_left: u8 },

    /// The PIN is blocked.
    #[error("PIN is blocked")]
    PinBlocked,

    /// The user cancelled PIN entry on the PIN-pad.
    #[error("PIN entry cancelled on PIN-pad")]
    PinPadCancelled,

    /// The card does not hold the requested certificate.
    #[error("No {certificate_type} certificate on card")]
    CertificateNotFound { certificate_type: CertificateType },

    /// Operation is not supported by this card.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

/// How the controller should react to a [`CardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardErrorClass {
    /// Transient; report a status update and let the user retry.
    Retriable(RetriableError),

    /// Wrong PIN with attempts remaining; ask for the PIN again.
    PinRetry { retries_left: u8 },

    /// The user cancelled on the reader itself.
    UserCancelled,

    /// Unrecoverable.
    Critical,
}

impl CardError {
    /// Create a new card removed error.
    pub fn card_removed(reader: impl Into<String>) -> Self {
        Self::CardRemoved {
            reader: reader.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Create a new transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }

    /// Create a new card command error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Classify the error at the point of detection.
    pub fn classify(&self) -> CardErrorClass {
        match self {
            Self::ServiceNotRunning => {
                CardErrorClass::Retriable(RetriableError::SmartCardServiceIsNotRunning)
            }
            Self::NoReaders => CardErrorClass::Retriable(RetriableError::NoSmartCardReadersFound),
            Self::CardRemoved { .. } => {
                CardErrorClass::Retriable(RetriableError::SmartCardWasRemoved)
            }
            Self::Communication { .. } => {
                CardErrorClass::Retriable(RetriableError::FailedToCommunicateWithCardOrReader)
            }
            Self::TransactionFailed { .. } => {
                CardErrorClass::Retriable(RetriableError::SmartCardTransactionFailed)
            }
            Self::CommandFailed { .. } => {
                CardErrorClass::Retriable(RetriableError::SmartCardCommandError)
            }
            Self::Timeout { .. } => CardErrorClass::Retriable(RetriableError::ReaderTimeout),
            Self::VerifyPinFailed { retries_left } => CardErrorClass::PinRetry {
                retries_left: *retries_left,
            },
            Self::PinBlocked => CardErrorClass::Retriable(RetriableError::PinBlocked),
            Self::PinPadCancelled => CardErrorClass::UserCancelled,
            Self::CertificateNotFound { .. } => {
                CardErrorClass::Retriable(RetriableError::NoValidCertificateAvailable)
            }
            Self::Unsupported { .. } => CardErrorClass::Retriable(RetriableError::UnsupportedCard),
            Self::Other(_) => CardErrorClass::Critical,
        }
    }
}
