#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(clippy::too_many_arguments, clippy::implicit_hasher, clippy::module_inception)]

#[macro_use]
extern crate log;

mod timer;
pub mod utils;

pub use self::timer::{create_timer, create_timer_incoming, TimerClient, TimerClientError, TimerError, TimerTick};
