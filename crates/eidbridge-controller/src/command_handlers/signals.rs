//! Handler-to-UI signal surface.

use std::fmt;
use std::sync::{Arc, OnceLock};

use eidbridge_core::RetriableError;
use tracing::warn;

use super::{CertificateReady, HandlerError};
use crate::ui::{UiResponder, WebEidUi};

struct Connection {
    ui: Arc<dyn WebEidUi>,
    responder: UiResponder,
}

/// Signals a handler emits towards the UI.
///
/// Connected at most once; emitting before `connect` is a no-op that
/// returns `false`.
#[derive(Default)]
pub struct HandlerSignals {
    connection: OnceLock<Connection>,
}

impl HandlerSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `HandlerError::SignalsAlreadyConnected` on the second call.
    pub fn connect(&self, ui: Arc<dyn WebEidUi>, responder: UiResponder) -> Result<(), HandlerError> {
        self.connection
            .set(Connection { ui, responder })
            .map_err(|_| HandlerError::SignalsAlreadyConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    /// The certificate was read and checked.
    pub fn certificate_ready(&self, certificate: &CertificateReady) -> bool {
        self.emit("certificate_ready", |c| {
            c.ui.on_certificate_ready(certificate, c.responder.clone())
        })
    }

    /// A retriable failure occurred.
    pub fn retriable_failure(&self, error: RetriableError, message: &str, retry_allowed: bool) -> bool {
        self.emit("retriable_failure", |c| {
            c.ui
                .show_retriable_error(error, message, retry_allowed, c.responder.clone())
        })
    }

    fn emit(&self, signal: &str, deliver: impl FnOnce(&Connection)) -> bool {
        match self.connection.get() {
            Some(connection) => {
                deliver(connection);
                true
            }
            None => {
                warn!("Dropping {} signal: handler signals not connected", signal);
                false
            }
        }
    }
}

impl fmt::Debug for HandlerSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSignals")
            .field("connected", &self.is_connected())
            .finish()
    }
}
