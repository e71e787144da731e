#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(clippy::too_many_arguments, clippy::implicit_hasher, clippy::module_inception)]

#[macro_use]
extern crate log;

pub mod initiator;
mod manager;
pub mod mediator;
pub mod target;
mod types;

#[cfg(test)]
mod test_utils;

pub use self::manager::{TransferManager, TransferManagerError, TransferOutput};
pub use self::types::{Role, TransferRole, TransitionResult};
