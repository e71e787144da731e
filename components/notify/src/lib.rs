#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(clippy::too_many_arguments, clippy::implicit_hasher, clippy::module_inception)]

#[macro_use]
extern crate log;

mod handler;

pub use self::handler::{create_notify_handler, NotifyHandler, NotifyReceivers};
