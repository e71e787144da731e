#![deny(trivial_numeric_casts)]
#![allow(
    clippy::too_many_arguments,
    clippy::implicit_hasher,
    clippy::module_inception,
    clippy::new_without_default
)]

#[macro_use]
extern crate log;

use std::io;

use structopt::StructOpt;

use bin::lmmgrlib::{lmmgr, LmMgrCmd, LmMgrError};

fn run() -> Result<(), LmMgrError> {
    env_logger::init();
    let lm_mgr_cmd = LmMgrCmd::from_args();
    lmmgr(lm_mgr_cmd, &mut io::stdout())
}

fn main() {
    if let Err(e) = run() {
        error!("run() error: {:?}", e);
    }
}
