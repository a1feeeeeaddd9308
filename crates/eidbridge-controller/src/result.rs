//! Command result and run outcome.

use serde::Serialize;
use serde_json::{Map, Value};

/// Errors from writing to a [`ResultMap`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultError {
    #[error("Result key '{0}' is already set")]
    DuplicateKey(String),
}

/// Write-once key/value result of a command.
///
/// Later stages may only add keys; overwriting a key is rejected.
///
/// # Examples
///
/// ```
/// use eidbridge_controller::{ResultError, ResultMap};
///
/// let mut result = ResultMap::new();
/// result.insert("certificate", "MIIB...").unwrap();
///
/// assert_eq!(
///     result.insert("certificate", "other"),
///     Err(ResultError::DuplicateKey("certificate".to_string()))
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultMap(Map<String, Value>);

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new key.
    ///
    /// # Errors
    ///
    /// Returns `ResultError::DuplicateKey` if the key is already present; the
    /// existing value is kept.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), ResultError> {
        let key = key.into();
        if self.0.contains_key(&key) {
            return Err(ResultError::DuplicateKey(key));
        }
        self.0.insert(key, value.into());
        Ok(())
    }

    /// Merge all keys of `other` into this map.
    ///
    /// All or nothing: if any key is already present, no key is added.
    pub fn merge(&mut self, other: ResultMap) -> Result<(), ResultError> {
        if let Some(duplicate) = other.0.keys().find(|key| self.0.contains_key(*key)) {
            return Err(ResultError::DuplicateKey(duplicate.clone()));
        }
        self.0.extend(other.0);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How a command run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum Outcome {
    /// The command completed; the result is complete.
    Success(ResultMap),

    /// The user cancelled.
    Cancelled,

    /// The command arguments were rejected before any card access.
    ArgumentError(String),

    /// The run failed unrecoverably.
    CriticalFailure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The result, present only on success.
    pub fn result(&self) -> Option<&ResultMap> {
        match self {
            Outcome::Success(result) => Some(result),
            _ => None,
        }
    }
}
