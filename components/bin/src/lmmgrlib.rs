use std::io::{self, Write};
use std::path::PathBuf;

use derive_more::From;

use structopt::StructOpt;

use crypto::hash_lock::HashLock;
use crypto::rand::{system_random, RandGen};

use proto::consts::BlockHeight;
use proto::crypto::{Address, Secret};

use node::{load_node_config, store_node_config, NodeConfig, NodeConfigError};

#[derive(Debug, StructOpt)]
pub struct InitConfigCmd {
    /// Our address on the ledger
    #[structopt(short = "a", long = "address")]
    pub our_address: Address,
    /// Node configuration output file path
    #[structopt(parse(from_os_str), short = "o", long = "output")]
    pub output_path: PathBuf,
    /// Dispute window of the channels we open (in blocks)
    #[structopt(long = "settle-timeout")]
    pub opt_settle_timeout: Option<BlockHeight>,
    /// Amount of blocks needed to learn a secret and propagate it backwards
    #[structopt(long = "reveal-timeout")]
    pub opt_reveal_timeout: Option<BlockHeight>,
    /// Placeholder partner used to bootstrap an empty token network
    #[structopt(long = "bootstrap")]
    pub opt_bootstrap_address: Option<Address>,
}

#[derive(Debug, StructOpt)]
pub struct CheckConfigCmd {
    /// Node configuration file path
    #[structopt(parse(from_os_str), short = "c", long = "config")]
    pub config_path: PathBuf,
}

#[derive(Debug, StructOpt)]
pub struct GenSecretCmd {}

/// lmmgr: LockMesh ManaGeR
#[derive(Debug, StructOpt)]
#[structopt(name = "lmmgr")]
pub enum LmMgrCmd {
    /// Create a new node configuration file
    #[structopt(name = "init-config")]
    InitConfig(InitConfigCmd),
    /// Load a node configuration file, validate it and show the values in effect
    #[structopt(name = "check-config")]
    CheckConfig(CheckConfigCmd),
    /// Randomly generate a payment secret and show its secret hash
    #[structopt(name = "gen-secret")]
    GenSecret(GenSecretCmd),
}

#[derive(Debug, From)]
pub enum InitConfigError {
    OutputAlreadyExists,
    NodeConfigError(NodeConfigError),
}

/// Create a node configuration file with default values, except for the ones given on the
/// command line.
fn init_config(
    InitConfigCmd {
        our_address,
        output_path,
        opt_settle_timeout,
        opt_reveal_timeout,
        opt_bootstrap_address,
    }: InitConfigCmd,
) -> Result<(), InitConfigError> {
    // Never override an existing configuration:
    if output_path.exists() {
        return Err(InitConfigError::OutputAlreadyExists);
    }

    let mut node_config = NodeConfig::new(our_address);
    if let Some(settle_timeout) = opt_settle_timeout {
        node_config.settle_timeout = settle_timeout;
    }
    if let Some(reveal_timeout) = opt_reveal_timeout {
        node_config.reveal_timeout = reveal_timeout;
    }
    if let Some(bootstrap_address) = opt_bootstrap_address {
        node_config.bootstrap_address = bootstrap_address;
    }
    node_config.validate()?;

    store_node_config(&node_config, &output_path)?;
    info!("init_config(): created {:?}", output_path);
    Ok(())
}

#[derive(Debug, From)]
pub enum CheckConfigError {
    NodeConfigError(NodeConfigError),
    TomlSeError(toml::ser::Error),
    IoError(io::Error),
}

fn check_config(
    CheckConfigCmd { config_path }: CheckConfigCmd,
    writer: &mut impl Write,
) -> Result<(), CheckConfigError> {
    let node_config = load_node_config(&config_path)?;
    // Show the full configuration, including the defaults that were filled in:
    writeln!(writer, "{}", toml::to_string(&node_config)?)?;
    Ok(())
}

#[derive(Debug, From)]
pub enum GenSecretError {
    RandError,
    IoError(io::Error),
}

fn gen_secret(_gen_secret_cmd: GenSecretCmd, writer: &mut impl Write) -> Result<(), GenSecretError> {
    let mut rng = system_random();
    let secret = Secret::rand_gen(&mut rng).map_err(|_| GenSecretError::RandError)?;

    writeln!(writer, "secret: {}", secret)?;
    writeln!(writer, "secret_hash: {}", secret.hash_lock())?;
    Ok(())
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, From)]
pub enum LmMgrError {
    InitConfigError(InitConfigError),
    CheckConfigError(CheckConfigError),
    GenSecretError(GenSecretError),
}

pub fn lmmgr(lm_mgr_cmd: LmMgrCmd, writer: &mut impl Write) -> Result<(), LmMgrError> {
    match lm_mgr_cmd {
        LmMgrCmd::InitConfig(i) => init_config(i)?,
        LmMgrCmd::CheckConfig(i) => check_config(i, writer)?,
        LmMgrCmd::GenSecret(i) => gen_secret(i, writer)?,
    }

    Ok(())
}
