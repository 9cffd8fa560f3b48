//! Configuration management
//!
//! Settings come from an optional TOML file, then `NODE_*`/`PEERS`/
//! `PARTICIPANTS`/`CONSENSUS` environment variables, then command-line flags.

pub mod settings;

pub use settings::{
    generate_node_id, Config, DEFAULT_BLOCK_INTERVAL_SECS, DEFAULT_BLOCK_SIZE, DEFAULT_NODE_ADDR,
    DEFAULT_ROTATION_INTERVAL_SECS,
};
