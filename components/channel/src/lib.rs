#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(clippy::too_many_arguments, clippy::implicit_hasher, clippy::module_inception)]

#[macro_use]
extern crate log;

mod channel;
mod graph;
mod network_view;

pub use self::channel::{
    balance, distributable, ChannelEndState, ChannelError, ChannelMutation, ChannelState,
    ChannelStatus, EndMutation,
};
pub use self::graph::ChannelGraph;
pub use self::network_view::NetworkView;
