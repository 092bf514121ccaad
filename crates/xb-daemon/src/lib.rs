//! xbridge daemon: environment loading and stack assembly for the
//! `xbridge` binary.

pub mod environment;
pub mod startup;
