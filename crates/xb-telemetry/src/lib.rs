//! Logging setup for xbridge binaries.
//!
//! stdout belongs to the command protocol, so every subscriber installed here
//! writes to stderr.

pub mod logging;
