//! Command controller for the eID bridge.
//!
//! This crate contains the state machine that turns one browser command
//! (`get-signing-certificate`, `authenticate` or `sign`) into a result:
//! card discovery and selection, command handlers running on child
//! threads, user confirmation through a [`WebEidUi`], retries, and
//! orderly shutdown.

pub mod child_thread;
pub mod command_handlers;
pub mod config;
pub mod controller;
pub mod event;
pub mod result;
pub mod state_machine;
pub mod ui;

pub use child_thread::{ChildThreadId, ChildThreadKind, ShutdownReport};
pub use command_handlers::{
    CertificateInfo, CertificateReady, CertificateStatus, CommandHandler, HandlerError,
    HandlerFailure, HandlerSignals, create_command_handler,
};
pub use config::{CardDiscovery, ControllerConfig, RunMode};
pub use controller::Controller;
pub use event::{ChildOutcome, ControllerEvent, UiEvent};
pub use result::{Outcome, ResultError, ResultMap};
pub use state_machine::{ControllerState, StateMachine, StateTransition, UserDecision};
pub use ui::{UiResponder, WebEidUi};
