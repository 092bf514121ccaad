//! Harness: the outbound HTTP path of the bridge.
//!
//! Everything between an action handler and the network lives here:
//! - [`transport`]: the `Transport` seam and the reqwest-backed implementation
//! - [`signing`]: transaction-token signer trait and the session `SigningContext`
//! - [`process_signer`]: signer that delegates to an external helper program
//! - [`headers`]: baseline session headers and the merge rules
//! - [`middleware`]: transport decorator that injects headers and tokens
//! - [`platform`] / [`graphql`]: the platform client and its GraphQL implementation
//! - [`response`]: projection of raw responses into entity schemas

pub mod graphql;
pub mod headers;
pub mod middleware;
pub mod platform;
pub mod process_signer;
pub mod response;
pub mod signing;
pub mod transport;
