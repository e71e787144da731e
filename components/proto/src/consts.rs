/// A block height on the ledger. This is the only clock used for lock expirations and
/// dispute windows.
pub type BlockHeight = u64;

/// An amount of tokens.
pub type TokenAmount = u128;

/// Sequence number of a balance proof.
pub type Nonce = u64;

/// Amount of ticks the chain monitor waits before subscribing again to new heads
/// after a ledger failure.
pub const CHAIN_BACKOFF_TICKS: usize = 1;

/// Amount of ticks between two checks of channel settlement while leaving a token network.
pub const SETTLE_POLL_TICKS: usize = 60;

/// Amount of blocks a node needs to learn a secret and propagate it backwards.
pub const DEFAULT_REVEAL_TIMEOUT: BlockHeight = 10;

/// Length of the dispute window, in blocks, after a channel was closed.
pub const DEFAULT_SETTLE_TIMEOUT: BlockHeight = 600;

/// Amount of channels a connection manager opens when joining a token network.
pub const DEFAULT_INITIAL_CHANNEL_TARGET: usize = 3;

/// Fraction of funds a connection manager keeps for joining channels opened by others.
pub const DEFAULT_JOINABLE_FUNDS_TARGET: f64 = 0.4;

/// Address of the placeholder partner used to bootstrap an empty token network.
pub const BOOTSTRAP_ADDRESS: [u8; 20] = [0x02; 20];

/// Amount of notifications buffered for a slow consumer before notifications are dropped.
pub const DEFAULT_NOTIFY_BUFFER: usize = 0x10;

/// Amount of blocks a chain-derived state change waits in the ordering buffer before it
/// is delivered.
pub const DEFAULT_CONFIRM_BLOCKS: BlockHeight = 1;

/// Amount of blocks a channel settlement waits for the closing of the channel before it is
/// delivered anyway.
pub const DEFAULT_SETTLE_HOLD_BLOCKS: BlockHeight = 100;

/// Amount of ticks between two checks for a channel we opened to show up in the network view.
pub const OPEN_POLL_TICKS: usize = 1;

/// Amount of checks for a channel we opened before giving up on depositing into it.
pub const OPEN_MAX_POLLS: usize = 120;
