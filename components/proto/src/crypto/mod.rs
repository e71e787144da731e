use common::define_fixed_bytes;

pub const ADDRESS_LEN: usize = 20;

// Address of a node, a token or a token network contract.
define_fixed_bytes!(Address, ADDRESS_LEN);

pub const HASH_RESULT_LEN: usize = 32;
define_fixed_bytes!(HashResult, HASH_RESULT_LEN);

pub const SECRET_LEN: usize = 32;
pub const SECRET_HASH_LEN: usize = 32;

define_fixed_bytes!(Secret, SECRET_LEN);
define_fixed_bytes!(SecretHash, SECRET_HASH_LEN);

pub const CHANNEL_ID_LEN: usize = 32;

// The on-chain identifier of a channel.
// A channel that was settled and opened again with the same partner gets a new identifier.
define_fixed_bytes!(ChannelId, CHANNEL_ID_LEN);

/// Root of the tree of all pending lock hashes of one channel direction.
pub type Locksroot = HashResult;
