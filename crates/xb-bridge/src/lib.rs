//! Bridge layer: the line-delimited JSON command protocol over stdio.
//!
//! Key modules:
//! - [`bridge`]: reader, dispatch and writer tasks plus the state machine
//! - [`protocol`]: command and result line formats
//! - [`action_registry`]: action name → handler table and argument rules
//! - [`actions`]: the built-in actions backed by the platform client
//! - [`shutdown`]: cooperative shutdown signal

pub mod action_registry;
pub mod actions;
pub mod bridge;
pub mod error;
pub mod protocol;
pub mod shutdown;
