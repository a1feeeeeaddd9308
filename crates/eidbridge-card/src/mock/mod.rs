//! Mock card backend for testing and development.
//!
//! This module provides a simulated card and reader set that can be
//! controlled programmatically without a smart card service.

pub mod card;
pub mod readers;

// Re-export commonly used types
pub use card::{
    AUTH_CERTIFICATE, EXPIRED_SIGNING_CERTIFICATE, MockCard, PinPadInput, SIGNING_CERTIFICATE,
};
pub use readers::{MockReaderHandle, MockReaders};
