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

mod manager;


pub use self::manager::{ConnectionManager, ConnectionManagerError};
