#![crate_type = "lib"]
#![deny(trivial_numeric_casts)]
#![allow(
    clippy::too_many_arguments,
    clippy::implicit_hasher,
    clippy::module_inception,
    clippy::new_without_default
)]

pub mod conn;
pub mod int_convert;
#[macro_use]
pub mod define_fixed_bytes;
