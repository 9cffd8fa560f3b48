//! In-memory network for multi-node tests
//!
//! Nodes are driven without sockets: each node's outbox is flushed into a
//! recording channel and the recorded frames are handed to their targets
//! until nothing is left in flight.

pub mod test_utils;

pub use test_utils::*;
