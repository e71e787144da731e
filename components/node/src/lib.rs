#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(
    clippy::too_many_arguments,
    clippy::implicit_hasher,
    clippy::module_inception,
    clippy::new_without_default
)]

#[macro_use]
extern crate log;

mod config;
mod dispatcher;
mod effects;
mod node;
mod orderer;
mod transport;


pub use self::config::{
    load_node_config, store_node_config, ConnectionConfig, NodeConfig, NodeConfigError,
};
pub use self::dispatcher::Dispatcher;
pub use self::effects::{execute_contract_send, ContractSendError};
pub use self::node::{Node, NodeError};
pub use self::orderer::ChainEventOrderer;
pub use self::transport::{ChannelTransport, PeerTransport};
