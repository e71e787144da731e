#![deny(trivial_numeric_casts)]
#![allow(
    clippy::too_many_arguments,
    clippy::implicit_hasher,
    clippy::module_inception
)]

pub mod error;
pub mod hash;
pub mod hash_lock;
pub mod locksroot;
pub mod rand;
pub mod test_utils;
