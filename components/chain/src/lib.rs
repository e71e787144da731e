#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(clippy::too_many_arguments, clippy::implicit_hasher, clippy::module_inception)]

#[macro_use]
extern crate log;

mod ledger;
mod monitor;
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use self::ledger::{LedgerClient, LedgerError};
pub use self::monitor::{
    BlockCallback, CallbackError, CallbackId, ChainMonitor, ChainMonitorError, ChainMonitorStopper,
};
