//! Detected card handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::traits::SmartCard;
use crate::types::{CardCapabilities, CertificateType, ReaderInfo};

/// One detected card and the reader it is inserted in.
///
/// `CardInfo` is shared as `Arc<CardInfo>` between the monitor, the
/// controller, the active command handler and the UI. It is immutable apart
/// from the removal flag: when the card is pulled out the monitor backend
/// sets the flag instead of invalidating the handle, so holders observe the
/// removal as an error on their next check.
///
/// The card name and capabilities are read once, when the monitor backend
/// creates the handle on its own thread. Everything the controller needs for
/// card eligibility and display is then plain data.
pub struct CardInfo {
    reader: ReaderInfo,
    name: String,
    capabilities: CardCapabilities,
    card: Arc<dyn SmartCard>,
    removed: AtomicBool,
}

impl CardInfo {
    /// Wrap a detected card.
    ///
    /// Queries the card, so only monitor backends call this, from their
    /// reader thread.
    pub fn new(reader: ReaderInfo, card: Arc<dyn SmartCard>) -> Arc<Self> {
        Arc::new(Self {
            reader,
            name: card.name().to_string(),
            capabilities: card.capabilities(),
            card,
            removed: AtomicBool::new(false),
        })
    }

    pub fn reader(&self) -> &ReaderInfo {
        &self.reader
    }

    pub fn card(&self) -> &dyn SmartCard {
        self.card.as_ref()
    }

    /// Card type name, as reported at detection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> CardCapabilities {
        self.capabilities
    }

    /// Check whether the card holds a certificate of the given type.
    pub fn supports(&self, certificate_type: CertificateType) -> bool {
        self.capabilities.supports(certificate_type)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Flag the card as removed. Called by monitor backends only.
    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardInfo")
            .field("reader", &self.reader.name)
            .field("card", &self.name)
            .field("capabilities", &self.capabilities)
            .field("removed", &self.is_removed())
            .finish()
    }
}

impl fmt::Display for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.name, self.reader.name)
    }
}
