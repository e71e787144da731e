use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use derive_more::From;
use serde::{Deserialize, Serialize};

use proto::consts::{
    BlockHeight, BOOTSTRAP_ADDRESS, CHAIN_BACKOFF_TICKS, DEFAULT_CONFIRM_BLOCKS,
    DEFAULT_INITIAL_CHANNEL_TARGET, DEFAULT_JOINABLE_FUNDS_TARGET, DEFAULT_NOTIFY_BUFFER,
    DEFAULT_REVEAL_TIMEOUT, DEFAULT_SETTLE_HOLD_BLOCKS, DEFAULT_SETTLE_TIMEOUT, OPEN_MAX_POLLS,
    OPEN_POLL_TICKS, SETTLE_POLL_TICKS,
};
use proto::crypto::Address;

#[derive(Debug, From)]
pub enum NodeConfigError {
    IoError(io::Error),
    TomlDeError(toml::de::Error),
    TomlSeError(toml::ser::Error),
    /// A payment must be able to wait for the reveal timeout twice inside the settle timeout.
    InvalidTimeouts,
    InvalidConnectionPolicy,
}

/// Policy used by `connect` when the caller does not give one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub initial_channel_target: usize,
    pub joinable_funds_target: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            initial_channel_target: DEFAULT_INITIAL_CHANNEL_TARGET,
            joinable_funds_target: DEFAULT_JOINABLE_FUNDS_TARGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Our address on the ledger
    pub our_address: Address,
    /// Amount of blocks a node needs to learn a secret and propagate it backwards
    #[serde(default = "default_reveal_timeout")]
    pub reveal_timeout: BlockHeight,
    /// Dispute window of the channels we open
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout: BlockHeight,
    /// Amount of ticks we wait before subscribing again to the ledger after a failure.
    /// Failed on-chain calls are retried with the same backoff.
    #[serde(default = "default_chain_backoff_ticks")]
    pub chain_backoff_ticks: usize,
    /// Amount of ticks between two settlement checks while leaving a token network
    #[serde(default = "default_settle_poll_ticks")]
    pub settle_poll_ticks: usize,
    /// Amount of ticks between two checks for a channel we opened to become visible
    #[serde(default = "default_open_poll_ticks")]
    pub open_poll_ticks: usize,
    /// Amount of checks before giving up on a channel we opened
    #[serde(default = "default_open_max_polls")]
    pub open_max_polls: usize,
    /// Amount of blocks a chain event waits before it is handled
    #[serde(default = "default_confirm_blocks")]
    pub confirm_blocks: BlockHeight,
    /// Amount of blocks a settlement waits for the closing of its channel
    #[serde(default = "default_settle_hold_blocks")]
    pub settle_hold_blocks: BlockHeight,
    /// Amount of notifications buffered for a slow consumer
    #[serde(default = "default_notify_buffer")]
    pub notify_buffer: usize,
    /// Placeholder partner used to bootstrap an empty token network
    #[serde(default = "default_bootstrap_address")]
    pub bootstrap_address: Address,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_reveal_timeout() -> BlockHeight {
    DEFAULT_REVEAL_TIMEOUT
}

fn default_settle_timeout() -> BlockHeight {
    DEFAULT_SETTLE_TIMEOUT
}

fn default_chain_backoff_ticks() -> usize {
    CHAIN_BACKOFF_TICKS
}

fn default_settle_poll_ticks() -> usize {
    SETTLE_POLL_TICKS
}

fn default_open_poll_ticks() -> usize {
    OPEN_POLL_TICKS
}

fn default_open_max_polls() -> usize {
    OPEN_MAX_POLLS
}

fn default_confirm_blocks() -> BlockHeight {
    DEFAULT_CONFIRM_BLOCKS
}

fn default_settle_hold_blocks() -> BlockHeight {
    DEFAULT_SETTLE_HOLD_BLOCKS
}

fn default_notify_buffer() -> usize {
    DEFAULT_NOTIFY_BUFFER
}

fn default_bootstrap_address() -> Address {
    Address::from(&BOOTSTRAP_ADDRESS)
}

impl NodeConfig {
    /// A configuration with default values.
    pub fn new(our_address: Address) -> Self {
        NodeConfig {
            our_address,
            reveal_timeout: default_reveal_timeout(),
            settle_timeout: default_settle_timeout(),
            chain_backoff_ticks: default_chain_backoff_ticks(),
            settle_poll_ticks: default_settle_poll_ticks(),
            open_poll_ticks: default_open_poll_ticks(),
            open_max_polls: default_open_max_polls(),
            confirm_blocks: default_confirm_blocks(),
            settle_hold_blocks: default_settle_hold_blocks(),
            notify_buffer: default_notify_buffer(),
            bootstrap_address: default_bootstrap_address(),
            connection: ConnectionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), NodeConfigError> {
        // Payments we initiate expire after half of the settle timeout, and must still leave
        // room for the reveal timeout:
        if self.reveal_timeout == 0 || self.settle_timeout / 2 <= self.reveal_timeout {
            return Err(NodeConfigError::InvalidTimeouts);
        }
        let joinable_funds_target = self.connection.joinable_funds_target;
        if self.connection.initial_channel_target == 0
            || !(0.0..=1.0).contains(&joinable_funds_target)
        {
            return Err(NodeConfigError::InvalidConnectionPolicy);
        }
        Ok(())
    }
}

/// Load a node configuration from a TOML file.
/// Missing values get their defaults.
pub fn load_node_config(path: &Path) -> Result<NodeConfig, NodeConfigError> {
    let data = fs::read_to_string(&path)?;
    let node_config: NodeConfig = toml::from_str(&data)?;
    node_config.validate()?;
    Ok(node_config)
}

pub fn store_node_config(node_config: &NodeConfig, path: &Path) -> Result<(), NodeConfigError> {
    let data = toml::to_string(node_config)?;

    let mut file = File::create(path)?;
    file.write_all(&data.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_node_config_defaults() {
        let node_config: NodeConfig = toml::from_str(
            r#"
            our_address = '0x0101010101010101010101010101010101010101'
        "#,
        )
        .unwrap();

        assert_eq!(node_config, NodeConfig::new(Address::from(&[1; Address::len()])));
        assert_eq!(node_config.connection.initial_channel_target, 3);
        assert_eq!(
            node_config.bootstrap_address,
            Address::from(&[2; Address::len()])
        );
        node_config.validate().unwrap();
    }

    #[test]
    fn test_node_config_partial() {
        let node_config: NodeConfig = toml::from_str(
            r#"
            our_address = '0x0101010101010101010101010101010101010101'
            reveal_timeout = 20
            settle_timeout = 100

            [connection]
            initial_channel_target = 5
            joinable_funds_target = 0.25
        "#,
        )
        .unwrap();

        assert_eq!(node_config.reveal_timeout, 20);
        assert_eq!(node_config.settle_timeout, 100);
        assert_eq!(node_config.confirm_blocks, DEFAULT_CONFIRM_BLOCKS);
        assert_eq!(node_config.connection.initial_channel_target, 5);
        assert_eq!(node_config.connection.joinable_funds_target, 0.25);
        node_config.validate().unwrap();
    }

    #[test]
    fn test_node_config_validate() {
        let mut node_config = NodeConfig::new(Address::from(&[1; Address::len()]));
        node_config.settle_timeout = 2 * node_config.reveal_timeout;
        match node_config.validate() {
            Err(NodeConfigError::InvalidTimeouts) => {}
            res => unreachable!("{:?}", res),
        }

        let mut node_config = NodeConfig::new(Address::from(&[1; Address::len()]));
        node_config.reveal_timeout = 0;
        match node_config.validate() {
            Err(NodeConfigError::InvalidTimeouts) => {}
            res => unreachable!("{:?}", res),
        }

        let mut node_config = NodeConfig::new(Address::from(&[1; Address::len()]));
        node_config.connection.joinable_funds_target = 1.5;
        match node_config.validate() {
            Err(NodeConfigError::InvalidConnectionPolicy) => {}
            res => unreachable!("{:?}", res),
        }
    }

    #[test]
    fn test_store_load_node_config() {
        // Create a temporary directory:
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("node_config.toml");

        let mut node_config = NodeConfig::new(Address::from(&[0xaa; Address::len()]));
        node_config.settle_timeout = 500;
        node_config.connection.joinable_funds_target = 0.5;

        store_node_config(&node_config, &file_path).unwrap();
        let node_config2 = load_node_config(&file_path).unwrap();

        assert_eq!(node_config, node_config2);
    }

    #[test]
    fn test_load_invalid_node_config() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("node_config.toml");

        let mut node_config = NodeConfig::new(Address::from(&[0xaa; Address::len()]));
        node_config.reveal_timeout = node_config.settle_timeout;
        store_node_config(&node_config, &file_path).unwrap();

        match load_node_config(&file_path) {
            Err(NodeConfigError::InvalidTimeouts) => {}
            res => unreachable!("{:?}", res),
        }
        match load_node_config(&dir.path().join("missing.toml")) {
            Err(NodeConfigError::IoError(_)) => {}
            res => unreachable!("{:?}", res),
        }
    }
}
