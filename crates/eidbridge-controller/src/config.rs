//! Controller configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use eidbridge_core::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_RETRIES};
use eidbridge_core::{Error, Result};

/// How the command reached the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Started by the user; a UI is present for the whole run.
    #[default]
    Interactive,

    /// Started by the browser extension with the command piped in.
    Pipe,
}

/// How the first set of cards is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardDiscovery {
    /// Snapshot the readers inline in `run()`.
    Synchronous,

    /// Subscribe to the monitor and snapshot on a child thread.
    EventDriven,
}

impl fmt::Display for CardDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => write!(f, "synchronous"),
            Self::EventDriven => write!(f, "event-driven"),
        }
    }
}

/// Configuration for a [`Controller`](crate::Controller).
///
/// # Examples
///
/// ```
/// use eidbridge_controller::{CardDiscovery, ControllerConfig, RunMode};
///
/// let config = ControllerConfig::default()
///     .with_mode(RunMode::Pipe)
///     .with_max_retries(1);
///
/// assert_eq!(config.discovery(), CardDiscovery::Synchronous);
/// assert_eq!(config.max_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Run mode, selects the default discovery strategy.
    pub mode: RunMode,

    /// Explicit discovery strategy, overriding the mode default.
    pub discovery: Option<CardDiscovery>,

    /// User-initiated retries allowed before the run fails critically.
    pub max_retries: u32,

    /// State transitions kept for diagnostics.
    pub history_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            discovery: None,
            max_retries: DEFAULT_MAX_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ControllerConfig {
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_discovery(mut self, discovery: CardDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Effective discovery strategy.
    ///
    /// Interactive runs are event-driven; piped runs snapshot synchronously
    /// unless [`discovery`](Self::discovery) says otherwise.
    pub fn discovery(&self) -> CardDiscovery {
        self.discovery.unwrap_or(match self.mode {
            RunMode::Interactive => CardDiscovery::EventDriven,
            RunMode::Pipe => CardDiscovery::Synchronous,
        })
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if no state history would be kept.
    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}
