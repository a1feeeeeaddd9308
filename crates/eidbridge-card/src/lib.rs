//! Smart card abstraction layer for the eID bridge.
//!
//! This crate defines what the controller needs to know about smart cards and
//! readers, without committing to a transport:
//!
//! - [`SmartCard`]: synchronous, blocking card operations (certificate reads,
//!   PIN verification, signing). Only called from worker threads.
//! - [`CardInfo`]: a detected card, shared as `Arc<CardInfo>` between the
//!   controller, handlers and the UI, with a removal flag set by the monitor.
//! - [`CardMonitor`]: reader and card presence, as a snapshot or as a stream
//!   of [`MonitorEvent`]s.
//!
//! # Error Handling
//!
//! All card operations return [`CardResult<T>`][error::CardResult]. Each
//! [`CardError`] is classified once with [`CardError::classify`] into a
//! retriable, PIN-retry, user-cancelled or critical failure.
//!
//! # Mock Implementations
//!
//! With the default `mock` feature the [`mock`] module provides a scriptable
//! card ([`mock::MockCard`]) and reader set ([`mock::MockReaders`]) for
//! development and testing without physical hardware:
//!
//! ```
//! use std::sync::Arc;
//! use eidbridge_card::mock::{MockCard, MockReaders};
//! use eidbridge_card::{CardMonitor, ReaderInfo};
//!
//! let (readers, handle) = MockReaders::new();
//! handle.insert_card(ReaderInfo::new("Reader 0"), Arc::new(MockCard::esteid()));
//!
//! let cards = readers.available_cards().unwrap();
//! assert_eq!(cards.len(), 1);
//! ```

pub mod card_info;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod monitor;
pub mod traits;
pub mod types;

pub use card_info::CardInfo;
pub use error::{CardError, CardErrorClass, CardResult};
pub use monitor::{CardMonitor, MonitorEvent, MonitorSubscription, Subscribers};
pub use traits::SmartCard;
pub use types::{
    CardCapabilities, CertificateType, HashAlgorithm, JsonWebSignatureAlgorithm, Pin, PinInfo,
    ReaderInfo, SignatureAlgorithm,
};
