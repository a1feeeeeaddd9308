//! Supervised worker threads for blocking card operations.
//!
//! Every blocking operation runs on its own `spawn_blocking` task and
//! reports exactly one [`ChildOutcome`] over the controller's event channel.
//! The controller keeps a registry of live child threads keyed by
//! [`ChildThreadId`]:
//!
//! - ids are allocated monotonically and never reused, so an outcome for an
//!   id that is no longer registered is a duplicate or late delivery and is
//!   ignored;
//! - each child gets a [`CancellationToken`] that the operation checks
//!   between card calls;
//! - panics are caught and reported as [`ChildOutcome::Panicked`].
//!
//! [`ChildThreads::wait_for_child_threads`] cancels and joins everything that
//! is still registered and leaves the registry empty.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::event::{ChildOutcome, ControllerEvent};

/// Opaque identity of a child thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildThreadId(u64);

impl ChildThreadId {
    #[cfg(test)]
    pub(crate) fn for_test(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChildThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a child thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildThreadKind {
    /// Reader snapshot for event-driven discovery.
    WaitForCard,

    /// `CommandHandler::run` (certificate read).
    CommandHandlerRun,

    /// `CommandHandler::on_confirm` (PIN verification and signing).
    CommandHandlerConfirm,
}

impl fmt::Display for ChildThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitForCard => write!(f, "WaitForCard"),
            Self::CommandHandlerRun => write!(f, "CommandHandlerRun"),
            Self::CommandHandlerConfirm => write!(f, "CommandHandlerConfirm"),
        }
    }
}

#[derive(Debug)]
struct ChildThreadEntry {
    kind: ChildThreadKind,
    cancel: CancellationToken,
}

/// Counts collected while joining child threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    pub cancelled: usize,
    pub panicked: usize,
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Task ran to completion (its outcome was sent or dropped).
    Completed,
    /// Task was aborted before it started.
    Cancelled,
    /// Task panicked outside the caught region.
    Panic,
}

/// Registry of live child threads.
#[derive(Debug)]
pub struct ChildThreads {
    next_id: u64,
    entries: HashMap<ChildThreadId, ChildThreadEntry>,
    tasks: JoinSet<()>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ChildThreads {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            tasks: JoinSet::new(),
            event_tx,
        }
    }

    /// Run `operation` on a new blocking child thread and register it.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn<F>(&mut self, kind: ChildThreadKind, operation: F) -> ChildThreadId
    where
        F: FnOnce(CancellationToken) -> ChildOutcome + Send + 'static,
    {
        let id = ChildThreadId(self.next_id);
        self.next_id += 1;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let event_tx = self.event_tx.clone();

        self.tasks.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| operation(token)))
                .unwrap_or_else(|payload| ChildOutcome::Panicked(panic_message(payload.as_ref())));
            if event_tx
                .send(ControllerEvent::ChildThread { id, outcome })
                .is_err()
            {
                trace!("Controller gone, dropping outcome of child thread {}", id);
            }
        });

        self.entries.insert(id, ChildThreadEntry { kind, cancel });
        debug!("Spawned {} child thread {}", kind, id);
        id
    }

    /// Remove a child thread whose outcome arrived.
    ///
    /// Returns `None` for ids that are not registered (duplicate or late
    /// delivery).
    pub(crate) fn complete(&mut self, id: ChildThreadId) -> Option<ChildThreadKind> {
        let entry = self.entries.remove(&id)?;
        trace!("{} child thread {} completed", entry.kind, id);
        self.reap();
        Some(entry.kind)
    }

    /// Ask one child thread to stop. It stays registered until it reports.
    pub(crate) fn cancel(&self, id: ChildThreadId) {
        if let Some(entry) = self.entries.get(&id) {
            debug!("Cancelling {} child thread {}", entry.kind, id);
            entry.cancel.cancel();
        }
    }

    /// Ask every child thread to stop.
    pub(crate) fn cancel_all(&self) {
        for (id, entry) in &self.entries {
            if !entry.cancel.is_cancelled() {
                debug!("Cancelling {} child thread {}", entry.kind, id);
                entry.cancel.cancel();
            }
        }
    }

    pub fn kind(&self, id: ChildThreadId) -> Option<ChildThreadKind> {
        self.entries.get(&id).map(|entry| entry.kind)
    }

    /// Number of registered child threads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel and join every child thread, then clear the registry.
    ///
    /// Blocking operations cannot be aborted; this waits until each one
    /// notices its cancellation token or finishes.
    pub async fn wait_for_child_threads(&mut self) -> ShutdownReport {
        self.cancel_all();
        self.tasks.abort_all();

        let mut report = ShutdownReport::default();
        while let Some(result) = self.tasks.join_next().await {
            match Self::classify_task_result(result) {
                TaskTermination::Completed => report.completed += 1,
                TaskTermination::Cancelled => report.cancelled += 1,
                TaskTermination::Panic => report.panicked += 1,
            }
        }

        if report.panicked > 0 {
            warn!("{} child threads panicked during shutdown", report.panicked);
        }
        self.entries.clear();
        report
    }

    /// Drop join handles of tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if Self::classify_task_result(result) == TaskTermination::Panic {
                warn!("Child thread task panicked");
            }
        }
    }

    fn classify_task_result(result: Result<(), JoinError>) -> TaskTermination {
        match result {
            Ok(()) => TaskTermination::Completed,
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
