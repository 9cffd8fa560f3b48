//! Utility functions and helpers
//!
//! Hashing, timestamps, the JSON encoding shared by hashing and the wire, and
//! a bounded recent-key set.

pub mod crypto;
pub mod recent;
pub mod serialization;

pub use crypto::{current_timestamp, sha256_digest, sha256_hex};
pub use recent::RecentSet;

pub use serialization::{canonical_bytes, decode, encode_line};
