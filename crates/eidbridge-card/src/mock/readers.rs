//! Mock reader set for testing and development.
//!
//! [`MockReaders`] is the [`CardMonitor`] handed to the controller;
//! [`MockReaderHandle`] stays with the test (or demo) and inserts and removes
//! cards, which is broadcast to every live subscription.

use std::sync::Arc;

use eidbridge_core::RetriableError;
use parking_lot::Mutex;
use tracing::debug;

use crate::card_info::CardInfo;
use crate::error::{CardError, CardResult};
use crate::monitor::{CardMonitor, MonitorEvent, MonitorSubscription, Subscribers};
use crate::traits::SmartCard;
use crate::types::ReaderInfo;

#[derive(Debug)]
struct ReaderState {
    cards: Vec<Arc<CardInfo>>,
    subscribers: Subscribers,
    service_running: bool,
}

/// Mock card monitor.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use eidbridge_card::mock::{MockCard, MockReaders};
/// use eidbridge_card::{CardMonitor, MonitorEvent, ReaderInfo};
///
/// #[tokio::main]
/// async fn main() {
///     let (readers, handle) = MockReaders::new();
///     let mut subscription = readers.subscribe();
///
///     handle.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
///
///     match subscription.recv().await {
///         Some(MonitorEvent::CardsAvailable(cards)) => assert_eq!(cards.len(), 1),
///         other => panic!("unexpected event: {:?}", other),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct MockReaders {
    shared: Arc<Mutex<ReaderState>>,
}

impl MockReaders {
    /// Create an empty reader set.
    ///
    /// Returns the monitor together with a handle that controls it.
    pub fn new() -> (Self, MockReaderHandle) {
        let shared = Arc::new(Mutex::new(ReaderState {
            cards: Vec::new(),
            subscribers: Subscribers::new(),
            service_running: true,
        }));

        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockReaderHandle { shared },
        )
    }
}

impl CardMonitor for MockReaders {
    fn available_cards(&self) -> CardResult<Vec<Arc<CardInfo>>> {
        let state = self.shared.lock();
        if !state.service_running {
            return Err(CardError::ServiceNotRunning);
        }
        Ok(state.cards.clone())
    }

    fn subscribe(&self) -> MonitorSubscription {
        self.shared.lock().subscribers.subscribe()
    }
}

/// Handle for controlling a [`MockReaders`] monitor.
#[derive(Debug, Clone)]
pub struct MockReaderHandle {
    shared: Arc<Mutex<ReaderState>>,
}

impl MockReaderHandle {
    /// Insert a card into a reader and broadcast the new card list.
    ///
    /// A card already in the same reader is removed first.
    pub fn insert_card(&self, reader: ReaderInfo, card: Arc<dyn SmartCard>) -> Arc<CardInfo> {
        let mut state = self.shared.lock();
        if let Some(position) = state.cards.iter().position(|c| c.reader().name == reader.name) {
            let previous = state.cards.remove(position);
            previous.mark_removed();
        }

        let info = CardInfo::new(reader, card);
        debug!(card = %info, "Mock card inserted");
        state.cards.push(Arc::clone(&info));

        let snapshot = state.cards.clone();
        state
            .subscribers
            .broadcast(MonitorEvent::CardsAvailable(snapshot));
        info
    }

    /// Pull the card out of the named reader.
    ///
    /// Returns `false` if the reader holds no card.
    pub fn remove_card(&self, reader_name: &str) -> bool {
        let mut state = self.shared.lock();
        let Some(position) = state.cards.iter().position(|c| c.reader().name == reader_name) else {
            return false;
        };

        let removed = state.cards.remove(position);
        removed.mark_removed();
        debug!(card = %removed, "Mock card removed");

        state
            .subscribers
            .broadcast(MonitorEvent::StatusUpdate(RetriableError::SmartCardWasRemoved));
        true
    }

    /// Announce a single card as ready.
    pub fn card_ready(&self, reader_name: &str) -> bool {
        let mut state = self.shared.lock();
        let Some(info) = state
            .cards
            .iter()
            .find(|c| c.reader().name == reader_name)
            .cloned()
        else {
            return false;
        };

        state.subscribers.broadcast(MonitorEvent::CardReady(info));
        true
    }

    /// Broadcast a status update.
    pub fn report_status(&self, status: RetriableError) {
        self.shared
            .lock()
            .subscribers
            .broadcast(MonitorEvent::StatusUpdate(status));
    }

    /// Simulate the smart card service stopping or starting.
    pub fn set_service_running(&self, running: bool) {
        let mut state = self.shared.lock();
        state.service_running = running;
        let event = if running {
            MonitorEvent::CardsAvailable(state.cards.clone())
        } else {
            MonitorEvent::StatusUpdate(RetriableError::SmartCardServiceIsNotRunning)
        };
        state.subscribers.broadcast(event);
    }

    pub fn card_count(&self) -> usize {
        self.shared.lock().cards.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }
}
