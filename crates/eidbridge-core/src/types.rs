use crate::{
    Result,
    constants::{ARG_ORIGIN, CMD_AUTHENTICATE, CMD_GET_SIGNING_CERTIFICATE, CMD_SIGN},
    error::Error,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Operation requested by the browser extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    #[serde(rename = "get-signing-certificate")]
    GetSigningCertificate,
    #[serde(rename = "authenticate")]
    Authenticate,
    #[serde(rename = "sign")]
    Sign,
}

impl CommandType {
    /// Wire name of the command.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::GetSigningCertificate => CMD_GET_SIGNING_CERTIFICATE,
            CommandType::Authenticate => CMD_AUTHENTICATE,
            CommandType::Sign => CMD_SIGN,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            CMD_GET_SIGNING_CERTIFICATE => Ok(CommandType::GetSigningCertificate),
            CMD_AUTHENTICATE => Ok(CommandType::Authenticate),
            CMD_SIGN => Ok(CommandType::Sign),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

/// Immutable command record supplied once at process start.
///
/// The argument mapping is kept as raw JSON; each command handler validates
/// the keys it needs when it is constructed.
///
/// # Examples
///
/// ```
/// use eidbridge_core::{Command, CommandType};
///
/// let command = Command::from_json(
///     r#"{"command": "get-signing-certificate", "arguments": {"origin": "https://ria.ee"}}"#,
/// )
/// .unwrap();
///
/// assert_eq!(command.command_type(), CommandType::GetSigningCertificate);
/// assert_eq!(command.origin(), Some("https://ria.ee"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    command_type: CommandType,

    #[serde(default)]
    arguments: Map<String, Value>,
}

impl Command {
    /// Create a command from its parts.
    pub fn new(command_type: CommandType, arguments: Map<String, Value>) -> Self {
        Self {
            command_type,
            arguments,
        }
    }

    /// Parse a command from its JSON representation.
    ///
    /// # Errors
    /// Returns `Error::UnknownCommand` for unsupported command names and
    /// `Error::InvalidCommandFormat` for any other malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;

        let name = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidCommandFormat("missing 'command' field".to_string()))?;
        let command_type: CommandType = name.parse()?;

        let arguments = match value.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments.clone(),
            Some(_) => {
                return Err(Error::InvalidCommandFormat(
                    "'arguments' must be an object".to_string(),
                ));
            }
        };

        Ok(Self::new(command_type, arguments))
    }

    #[must_use]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    #[must_use]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Requesting origin as supplied by the extension, unvalidated.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.arguments.get(ARG_ORIGIN).and_then(Value::as_str)
    }
}

/// Classification of transient failures.
///
/// Retriable errors are shown to the user as a status message together with
/// a retry affordance; the run itself continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum RetriableError {
    SmartCardServiceIsNotRunning,
    NoSmartCardReadersFound,
    NoSmartCardsFound,
    FailedToCommunicateWithCardOrReader,
    SmartCardWasRemoved,
    SmartCardTransactionFailed,
    SmartCardChangeRequired,
    SmartCardCommandError,
    ReaderTimeout,
    PinBlocked,
    PinVerifyDisabled,
    UnsupportedCard,
    NoValidCertificateAvailable,
    UnknownError,
}

impl RetriableError {
    /// Human-readable message for status updates.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            RetriableError::SmartCardServiceIsNotRunning => {
                "The smart card service is not running"
            }
            RetriableError::NoSmartCardReadersFound => "No smart card readers found",
            RetriableError::NoSmartCardsFound => "No supported smart cards found",
            RetriableError::FailedToCommunicateWithCardOrReader => {
                "Failed to communicate with the card or reader"
            }
            RetriableError::SmartCardWasRemoved => "The smart card was removed",
            RetriableError::SmartCardTransactionFailed => "The smart card transaction failed",
            RetriableError::SmartCardChangeRequired => "Please insert a different smart card",
            RetriableError::SmartCardCommandError => "The smart card rejected a command",
            RetriableError::ReaderTimeout => "The card reader timed out",
            RetriableError::PinBlocked => "The PIN is blocked",
            RetriableError::PinVerifyDisabled => "PIN verification is disabled on this card",
            RetriableError::UnsupportedCard => "The smart card is not supported",
            RetriableError::NoValidCertificateAvailable => "No valid certificate available",
            RetriableError::UnknownError => "An unknown error occurred",
        }
    }

    /// Whether recovering from this error needs a card to be (re)inserted.
    ///
    /// The controller waits for card events after these errors instead of
    /// waiting for an explicit retry.
    #[must_use]
    pub fn requires_card_event(&self) -> bool {
        matches!(
            self,
            RetriableError::NoSmartCardReadersFound
                | RetriableError::NoSmartCardsFound
                | RetriableError::SmartCardWasRemoved
                | RetriableError::SmartCardChangeRequired
                | RetriableError::FailedToCommunicateWithCardOrReader
        )
    }
}

impl fmt::Display for RetriableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.message())
    }
}
