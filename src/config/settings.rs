use crate::consensus::vote::{DEFAULT_CONSENSUS_THRESHOLD, DEFAULT_MIN_VOTES};
use crate::consensus::{ConsensusKind, DEFAULT_MAX_ROLLBACK_DEPTH};
use crate::core::{Role, OFFLOAD_THRESHOLD_BYTES};
use crate::error::{LedgerError, Result};
use crate::storage::DEFAULT_MEMPOOL_CAPACITY;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
pub const DEFAULT_BLOCK_SIZE: usize = 10;
pub const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BLOCK_INTERVAL_SECS: u64 = 5;

const NODE_ID_KEY: &str = "NODE_ID";
const NODE_ROLE_KEY: &str = "NODE_ROLE";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const PEERS_KEY: &str = "PEERS";
const PARTICIPANTS_KEY: &str = "PARTICIPANTS";
const CONSENSUS_KEY: &str = "CONSENSUS";

/// Node settings. Every field has a default, so a config file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    pub role: Role,
    pub listen_address: String,
    /// Addresses dialed at startup
    pub peers: Vec<String>,
    /// Node ids taking part in quorum consensus, this node included
    pub participants: Vec<String>,
    pub consensus: ConsensusKind,
    pub mempool_capacity: usize,
    pub block_size: usize,
    pub consensus_threshold: f64,
    pub min_votes: usize,
    pub max_rollback_depth: usize,
    pub rotation_interval_secs: u64,
    pub block_interval_secs: u64,
    pub offload_threshold: usize,
    /// Enables the in-process blob store, handing out urls under this base
    pub blob_base_url: Option<String>,
    /// Where chain.json and ledger.json are written after each new block
    pub export_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: generate_node_id(),
            role: Role::Ngo,
            listen_address: String::from(DEFAULT_NODE_ADDR),
            peers: Vec::new(),
            participants: Vec::new(),
            consensus: ConsensusKind::Vote,
            mempool_capacity: DEFAULT_MEMPOOL_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            min_votes: DEFAULT_MIN_VOTES,
            max_rollback_depth: DEFAULT_MAX_ROLLBACK_DEPTH,
            rotation_interval_secs: DEFAULT_ROTATION_INTERVAL_SECS,
            block_interval_secs: DEFAULT_BLOCK_INTERVAL_SECS,
            offload_threshold: OFFLOAD_THRESHOLD_BYTES,
            blob_base_url: None,
            export_dir: None,
            log_level: String::from("info"),
        }
    }
}

/// `node_` followed by nine random lowercase alphanumerics
pub fn generate_node_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("node_{suffix}")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Reads a TOML file, falling back to defaults for missing keys
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// File (when given) then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the environment variable names
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            self.node_id = node_id;
        }
        if let Some(role) = lookup(NODE_ROLE_KEY) {
            self.role = role.parse()?;
        }
        if let Some(addr) = lookup(NODE_ADDRESS_KEY) {
            self.listen_address = addr;
        }
        if let Some(peers) = lookup(PEERS_KEY) {
            self.peers = split_list(&peers);
        }
        if let Some(participants) = lookup(PARTICIPANTS_KEY) {
            self.participants = split_list(&participants);
        }
        if let Some(consensus) = lookup(CONSENSUS_KEY) {
            self.consensus = consensus.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(LedgerError::Config("node_id must not be empty".to_string()));
        }
        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            LedgerError::Config(format!(
                "Invalid listen address {}: {e}",
                self.listen_address
            ))
        })?;
        for (name, value) in [
            ("mempool_capacity", self.mempool_capacity),
            ("block_size", self.block_size),
            ("min_votes", self.min_votes),
            ("max_rollback_depth", self.max_rollback_depth),
        ] {
            if value == 0 {
                return Err(LedgerError::Config(format!("{name} must be positive")));
            }
        }
        if self.rotation_interval_secs == 0 || self.block_interval_secs == 0 {
            return Err(LedgerError::Config(
                "Timer intervals must be positive".to_string(),
            ));
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(LedgerError::Config(format!(
                "consensus_threshold must be in (0, 1], got {}",
                self.consensus_threshold
            )));
        }
        if !self.participants.is_empty() && !self.participants.contains(&self.node_id) {
            return Err(LedgerError::Config(format!(
                "{} is not in the participant list",
                self.node_id
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LedgerError::Config(e.to_string()))
    }
}
