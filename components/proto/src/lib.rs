#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(
    clippy::too_many_arguments,
    clippy::implicit_hasher,
    clippy::module_inception,
    clippy::new_without_default
)]

pub mod consts;
pub mod crypto;
pub mod notify;
pub mod state_change;
pub mod transfer;
