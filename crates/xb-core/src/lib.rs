//! Core types for xbridge: configuration, session credentials, and the
//! entity schemas shared by the platform client and the command bridge.

pub mod config;
pub mod credentials;
pub mod types;
