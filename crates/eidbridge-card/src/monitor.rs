//! Card and reader monitoring.
//!
//! A [`CardMonitor`] watches readers for card insertion and removal. The
//! controller takes a synchronous snapshot with
//! [`CardMonitor::available_cards`] and, while it waits for a usable card,
//! holds a [`MonitorSubscription`] that delivers [`MonitorEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  broadcast   ┌────────────────────┐
//! │ Reader       │─────────────►│ MonitorSubscription │──────► Controller
//! │ backend      │              │ (mpsc, unbounded)   │
//! └──────────────┘              └────────────────────┘
//! ```
//!
//! Dropping the subscription unsubscribes; backends prune closed
//! subscribers on their next broadcast.

use std::sync::Arc;

use eidbridge_core::RetriableError;
use tokio::sync::mpsc;
use tracing::trace;

use crate::card_info::CardInfo;
use crate::error::CardResult;

/// Event delivered by a card monitor.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MonitorEvent {
    /// Snapshot of all cards currently inserted.
    CardsAvailable(Vec<Arc<CardInfo>>),

    /// A single card became ready for use.
    CardReady(Arc<CardInfo>),

    /// Reader or card state change that the user should be told about.
    StatusUpdate(RetriableError),
}

/// Source of card and reader events.
///
/// Monitors are shared with worker threads that take snapshots, hence
/// `Send + Sync`.
pub trait CardMonitor: Send + Sync {
    /// Cards currently inserted, read synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the smart card service or the readers are
    /// unavailable.
    fn available_cards(&self) -> CardResult<Vec<Arc<CardInfo>>>;

    /// Start receiving card events until the subscription is dropped.
    fn subscribe(&self) -> MonitorSubscription;
}

/// Receiving end of a monitor subscription.
#[derive(Debug)]
pub struct MonitorSubscription {
    event_rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl MonitorSubscription {
    /// Receive the next event.
    ///
    /// Returns `None` when the monitor has shut down.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.event_rx.recv().await
    }
}

/// Subscriber bookkeeping for monitor backends.
#[derive(Debug, Default)]
pub struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<MonitorEvent>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> MonitorSubscription {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.senders.push(event_tx);
        MonitorSubscription { event_rx }
    }

    /// Send an event to every live subscriber, dropping closed ones.
    pub fn broadcast(&mut self, event: MonitorEvent) {
        self.senders.retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                trace!("Dropping closed monitor subscriber");
                false
            }
        });
    }

    /// Number of live subscribers as of the last broadcast.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
